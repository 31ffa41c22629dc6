//! Persisted token pools
//!
//! A pool is the JSON array stored under `token_<region>.json`. Record
//! order is preserved from load through slicing; the window rotator relies
//! on it to hand each block of calls a stable slice.

use serde::{Deserialize, Serialize};
use token_store::{VersionTag, VersionedStore};
use tracing::debug;

use crate::error::{Error, Result};

/// One issued token as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(
        rename = "uid",
        alias = "identifier",
        deserialize_with = "token_issuer::lenient_string"
    )]
    pub identifier: String,
    pub token: String,
}

/// A loaded pool together with the version it was read at.
#[derive(Debug, Clone)]
pub struct TokenPool {
    pub records: Vec<TokenRecord>,
    pub version: VersionTag,
}

impl TokenPool {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Store key holding the token pool for `region`.
pub fn pool_key(region: &str) -> String {
    format!("token_{region}.json")
}

/// Region codes end up in store keys: ASCII alphanumerics, `-` and `_` only.
pub fn is_valid_region(region: &str) -> bool {
    !region.is_empty()
        && region.len() <= 32
        && region
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Load the pool for `region`. `Ok(None)` when no pool has been written yet.
pub async fn load_pool(store: &dyn VersionedStore, region: &str) -> Result<Option<TokenPool>> {
    let key = pool_key(region);
    let Some(object) = store
        .read(&key)
        .await
        .map_err(|e| Error::Store(format!("reading {key}: {e}")))?
    else {
        return Ok(None);
    };

    let records: Vec<TokenRecord> =
        serde_json::from_slice(&object.content).map_err(|e| Error::MalformedPool {
            key: key.clone(),
            detail: e.to_string(),
        })?;

    debug!(region, size = records.len(), version = %object.version, "loaded pool");
    Ok(Some(TokenPool {
        records,
        version: object.version,
    }))
}
