//! Error types for pool operations

/// Errors from loading, refreshing and persisting token pools.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credential source missing or unparseable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pool changed between read and write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    /// A read from the store failed.
    #[error("store error: {0}")]
    Store(String),

    /// A persisted pool could not be parsed.
    #[error("malformed pool {key}: {detail}")]
    MalformedPool { key: String, detail: String },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
