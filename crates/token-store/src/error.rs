//! Error types for store operations

/// Errors from versioned store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stale version tag on update, or create of an existing key.
    #[error("version conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("unexpected store response: {0}")]
    Decode(String),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
