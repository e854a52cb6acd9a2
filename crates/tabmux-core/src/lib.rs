//! tabmux-core: Shared library for tabmux.
//!
//! Provides the JSON control frames spoken to the remote shell endpoint, the
//! asciicast v2 recording format, the terminal buffer contract (with a plain
//! line-oriented implementation), the reconnect backoff policy, and the
//! revocable scheduled-task queue used by every engine that needs timers.

pub mod backoff;
pub mod buffer;
pub mod cast;
pub mod error;
pub mod frames;
pub mod timers;

// Re-export commonly used items at crate root.
pub use backoff::{Backoff, BACKOFF_CEILING_MS, BACKOFF_FLOOR_MS};
pub use buffer::{Geometry, LineBuffer, TerminalBuffer};
pub use cast::{parse_cast, serialize_cast, Cast, CastEvent, CastHeader};
pub use error::{MuxError, MuxResult};
pub use frames::ClientFrame;
pub use timers::{TaskHandle, TaskQueue};
