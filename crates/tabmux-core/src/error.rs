use thiserror::Error;

/// Errors produced by tabmux.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("sub-session limit ({limit}) reached")]
    Capacity { limit: usize },

    #[error("cast parse error on line {line}: {reason}")]
    CastParse { line: usize, reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MuxError {
    /// Shorthand for a cast parse failure at a 1-based line number.
    pub fn cast(line: usize, reason: impl Into<String>) -> Self {
        MuxError::CastParse {
            line,
            reason: reason.into(),
        }
    }
}

pub type MuxResult<T> = Result<T, MuxError>;
