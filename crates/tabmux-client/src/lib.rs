//! tabmux-client: the multiplexing engine behind `tabmux`.
//!
//! Each tab holds up to eight sub-sessions, every one an independently
//! reconnecting remote shell with its own terminal buffer. Output of all of a
//! tab's sub-sessions can be recorded to an asciicast log, replayed with
//! seeking and variable speed, and sliced into per-command captures.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Instant;
//! use tabmux_client::{
//!     event_channel, FixedSurface, FsRecordingStore, NullView, Runtime, Workspace,
//!     WorkspaceConfig, WsTransportFactory,
//! };
//! use tabmux_core::Geometry;
//!
//! # async fn example() -> tabmux_core::MuxResult<()> {
//! let (events_tx, events_rx) = event_channel();
//! let mut workspace = Workspace::new(
//!     WorkspaceConfig { token: "secret".into(), ..Default::default() },
//!     Box::new(WsTransportFactory::new("wss://example.com/term", events_tx)),
//!     Box::new(FsRecordingStore::default_location()?),
//!     Box::new(NullView),
//!     Box::new(FixedSurface(Geometry::new(120, 40))),
//! );
//! workspace.create_tab("main", Instant::now());
//! workspace.activate_tab("main", Instant::now());
//!
//! let runtime = Runtime::new(workspace, events_rx);
//! let handle = runtime.handle();
//! tokio::spawn(runtime.run());
//! handle.input("main", "uptime\r").await;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod connection;
pub mod multiplexer;
pub mod playback;
pub mod recorder;
pub mod runtime;
pub mod storage;
pub mod transport;
pub mod view;
pub mod workspace;

/// Identifies a tab.
pub type TabId = String;
/// Identifies a sub-session within its tab. Ids start at 1 and are never reused.
pub type SubId = u32;

pub use capture::{Capture, Mark};
pub use connection::ConnState;
pub use multiplexer::{SessionMultiplexer, SubSessionInfo, MAX_SUB_SESSIONS};
pub use playback::{PlaybackEngine, PlaybackState, SPEEDS};
pub use recorder::{Recorder, RecordingSession};
pub use runtime::{Command, Runtime, RuntimeHandle};
pub use storage::{FsRecordingStore, RecordingInfo, RecordingStore};
pub use transport::{event_channel, TransportEvent, WsTransportFactory};
pub use view::{FixedSurface, NullView, Surface, ViewSink};
pub use workspace::{RecordingToggle, Settings, StopOutcome, Workspace, WorkspaceConfig};

pub use tabmux_core::{MuxError, MuxResult};
