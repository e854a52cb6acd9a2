//! Asciicast v2 recording format.
//!
//! Line 1 is a JSON header object; every following line is one
//! `[elapsed_seconds, "o", payload]` array. Lines are newline-delimited and
//! the text always ends with a newline.

use serde::{Deserialize, Serialize};

use crate::buffer::Geometry;
use crate::error::{MuxError, MuxResult};

/// The only cast version this crate reads and writes.
pub const CAST_VERSION: u32 = 2;

/// Event code for terminal output.
pub const OUTPUT_CODE: &str = "o";

/// Largest event timestamp accepted on parse (one year, in seconds).
pub const MAX_ELAPSED_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Environment captured in the cast header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastEnv {
    #[serde(rename = "SHELL", default)]
    pub shell: String,
    #[serde(rename = "TERM", default)]
    pub term: String,
}

impl Default for CastEnv {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            term: "xterm-256color".to_string(),
        }
    }
}

/// First line of a cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastHeader {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    /// Unix seconds at recording start.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub env: CastEnv,
}

impl CastHeader {
    pub fn new(geometry: Geometry, timestamp: u64) -> Self {
        Self {
            version: CAST_VERSION,
            width: geometry.cols,
            height: geometry.rows,
            timestamp,
            env: CastEnv::default(),
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.width, self.height)
    }
}

/// One output event.
#[derive(Debug, Clone, PartialEq)]
pub struct CastEvent {
    /// Seconds since recording start.
    pub elapsed: f64,
    pub data: String,
}

impl CastEvent {
    pub fn new(elapsed: f64, data: impl Into<String>) -> Self {
        Self {
            elapsed,
            data: data.into(),
        }
    }
}

/// A parsed or freshly built cast.
#[derive(Debug, Clone, PartialEq)]
pub struct Cast {
    pub header: CastHeader,
    pub events: Vec<CastEvent>,
}

/// Round elapsed seconds to microsecond precision, as asciicast writers do.
pub fn round_elapsed(secs: f64) -> f64 {
    (secs * 1_000_000.0).round() / 1_000_000.0
}

/// Serialize a header and its events into cast text.
pub fn serialize_cast(header: &CastHeader, events: &[CastEvent]) -> MuxResult<String> {
    let mut out = serde_json::to_string(header)?;
    out.push('\n');
    for event in events {
        out.push_str(&serde_json::to_string(&(
            event.elapsed,
            OUTPUT_CODE,
            event.data.as_str(),
        ))?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse cast text. Fails on the first malformed line.
///
/// Non-output events (for example `"i"` input events) are skipped.
pub fn parse_cast(text: &str) -> MuxResult<Cast> {
    let mut lines = text.lines().enumerate();

    let (_, header_line) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or_else(|| MuxError::cast(1, "empty cast"))?;
    let header: CastHeader = serde_json::from_str(header_line)
        .map_err(|e| MuxError::cast(1, format!("invalid header: {e}")))?;
    if header.version != CAST_VERSION {
        return Err(MuxError::cast(
            1,
            format!("unsupported version {}", header.version),
        ));
    }

    let mut events = Vec::new();
    let mut last = 0.0_f64;
    for (idx, line) in lines {
        let lineno = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| MuxError::cast(lineno, format!("invalid JSON: {e}")))?;
        let arr = value
            .as_array()
            .ok_or_else(|| MuxError::cast(lineno, "event is not an array"))?;
        if arr.len() < 3 {
            return Err(MuxError::cast(lineno, "event needs three elements"));
        }
        let elapsed = arr[0]
            .as_f64()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or_else(|| MuxError::cast(lineno, "invalid timestamp"))?;
        if elapsed > MAX_ELAPSED_SECS {
            return Err(MuxError::cast(lineno, "timestamp out of range"));
        }
        let code = arr[1]
            .as_str()
            .ok_or_else(|| MuxError::cast(lineno, "invalid event code"))?;
        let data = arr[2]
            .as_str()
            .ok_or_else(|| MuxError::cast(lineno, "invalid event payload"))?;
        if elapsed < last {
            return Err(MuxError::cast(lineno, "timestamps go backwards"));
        }
        last = elapsed;
        if code != OUTPUT_CODE {
            continue;
        }
        events.push(CastEvent::new(elapsed, data));
    }

    Ok(Cast { header, events })
}
