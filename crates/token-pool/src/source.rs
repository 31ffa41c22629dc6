//! Per-region credential source

use token_issuer::Credential;
use token_store::VersionedStore;
use tracing::debug;

use crate::error::{Error, Result};

/// Store key holding the credential list for `region`.
pub fn input_key(region: &str) -> String {
    format!("input_{region}.json")
}

/// Read and parse the credential list for `region`.
///
/// The resource is a JSON array of `{uid, password}` objects. Entries with
/// missing fields come back with empty strings; the scheduler skips them.
pub async fn load_credentials(store: &dyn VersionedStore, region: &str) -> Result<Vec<Credential>> {
    let key = input_key(region);
    let object = store
        .read(&key)
        .await
        .map_err(|e| Error::Store(format!("reading {key}: {e}")))?
        .ok_or_else(|| Error::Config(format!("credential source {key} not found")))?;

    let credentials: Vec<Credential> = serde_json::from_slice(&object.content)
        .map_err(|e| Error::Config(format!("credential source {key} is not valid: {e}")))?;

    debug!(region, count = credentials.len(), "loaded credentials");
    Ok(credentials)
}
