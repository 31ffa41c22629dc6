//! Versioned key/value store abstraction
//!
//! Defines the `VersionedStore` trait that decouples the refresh and dispatch
//! paths from where token files actually live. Every read returns the
//! content together with an opaque version tag; updates must present the
//! tag from the most recent read, and a stale tag is a `Conflict` rather
//! than a silent overwrite.
//!
//! Backends:
//! - `FileStore`: a local directory, tags are SHA-256 content hashes
//! - `GithubStore`: the GitHub contents API, tags are blob SHAs
//! - `MemoryStore`: in-process, for tests and dry runs

pub mod error;
pub mod file;
pub mod github;
pub mod memory;

pub use error::{Error, Result};
pub use file::FileStore;
pub use github::{GithubConfig, GithubStore};
pub use memory::MemoryStore;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Opaque version identifier returned by reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content of a key together with the version it was read at.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub version: VersionTag,
}

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Key → (content, version tag) store with optimistic-concurrency updates.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn VersionedStore>`).
pub trait VersionedStore: Send + Sync {
    /// Backend name for logging and admin output (e.g. "file", "github").
    fn id(&self) -> &str;

    /// Read a key. `Ok(None)` when the key does not exist.
    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<StoredObject>>;

    /// Create a key that must not exist yet. An existing key is a `Conflict`.
    fn create<'a>(
        &'a self,
        key: &'a str,
        content: Vec<u8>,
        message: &'a str,
    ) -> StoreFuture<'a, VersionTag>;

    /// Replace a key's content if its current version still equals `version`.
    ///
    /// A stale `version` is a `Conflict`; a missing key is `NotFound`.
    fn update<'a>(
        &'a self,
        key: &'a str,
        content: Vec<u8>,
        version: &'a VersionTag,
        message: &'a str,
    ) -> StoreFuture<'a, VersionTag>;
}

/// Reject keys that could escape a store root or address a directory.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_token_file_keys() {
        assert!(validate_key("token_bd.json").is_ok());
        assert!(validate_key("input_ind.json").is_ok());
    }

    #[test]
    fn rejects_traversal_and_hidden_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b.json").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("token bd.json").is_err());
    }

    #[test]
    fn version_tag_displays_inner_value() {
        let tag = VersionTag::new("abc123");
        assert_eq!(tag.to_string(), "abc123");
        assert_eq!(tag.as_str(), "abc123");
    }
}
