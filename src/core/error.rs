//! Error types for the LOD data engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Header magic, guard word, checksum, width or detail mismatch.
    #[error("Format error: {0}")]
    Format(String),

    /// A position outside an index's configured range. Never clamped.
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// A long-running decode/generation task observed its cancellation signal.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Forbidden concurrent access (two writers on one file). Not retried.
    #[error("Concurrency violation: {0}")]
    Concurrency(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error means the stored data is unusable (as opposed to a transient failure).
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }

    /// Convert payload stream read errors: a short read inside a payload is corruption, not I/O.
    pub(crate) fn from_payload_io(err: std::io::Error, context: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Format(format!("truncated payload while reading {}", context))
        } else {
            Error::Io(err)
        }
    }
}

/// Shared results (one in-flight task, many waiters) hand each waiter its own copy.
/// I/O errors keep their kind and message.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Format(s) => Error::Format(s.clone()),
            Error::OutOfBounds(s) => Error::OutOfBounds(s.clone()),
            Error::Interrupted(s) => Error::Interrupted(s.clone()),
            Error::Concurrency(s) => Error::Concurrency(s.clone()),
            Error::Generation(s) => Error::Generation(s.clone()),
            Error::Config(s) => Error::Config(s.clone()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
