//! Fold issue outcomes into the persisted pool
//!
//! Only issued tokens are written. An empty result leaves the existing
//! pool untouched, so a run where the issuer is down never wipes the pool
//! dispatch is serving from.

use token_issuer::TokenOutcome;
use token_store::{VersionTag, VersionedStore};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pool::{TokenRecord, pool_key};

/// What `reconcile` did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileReport {
    /// No outcome carried a token; nothing was written.
    Skipped,
    Created { records: usize, version: VersionTag },
    Updated { records: usize, version: VersionTag },
}

impl ReconcileReport {
    pub fn records(&self) -> usize {
        match self {
            ReconcileReport::Skipped => 0,
            ReconcileReport::Created { records, .. } | ReconcileReport::Updated { records, .. } => {
                *records
            }
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ReconcileReport::Skipped => "skipped",
            ReconcileReport::Created { .. } => "created",
            ReconcileReport::Updated { .. } => "updated",
        }
    }
}

/// Persist the issued tokens for `region`, replacing the previous pool.
///
/// Records keep completion order. A concurrent writer between our read and
/// write surfaces as `Error::Conflict`; any other store failure is
/// `Error::Persistence`.
pub async fn reconcile(
    store: &dyn VersionedStore,
    region: &str,
    outcomes: &[TokenOutcome],
) -> Result<ReconcileReport> {
    let records: Vec<TokenRecord> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            TokenOutcome::Issued { identifier, token } => Some(TokenRecord {
                identifier: identifier.clone(),
                token: token.clone(),
            }),
            TokenOutcome::Failed { .. } => None,
        })
        .collect();

    if records.is_empty() {
        warn!(region, outcomes = outcomes.len(), "no tokens issued, leaving pool unchanged");
        return Ok(ReconcileReport::Skipped);
    }

    let key = pool_key(region);
    let content = serde_json::to_vec_pretty(&records)
        .map_err(|e| Error::Persistence(format!("serializing {key}: {e}")))?;

    let existing = store
        .read(&key)
        .await
        .map_err(|e| Error::Persistence(format!("reading {key}: {e}")))?;

    let count = records.len();
    let report = match existing {
        Some(current) => {
            let message = format!("Update tokens for {region}");
            let version = store
                .update(&key, content, &current.version, &message)
                .await
                .map_err(|e| write_error(&key, e))?;
            ReconcileReport::Updated {
                records: count,
                version,
            }
        }
        None => {
            let message = format!("Create tokens for {region}");
            let version = store
                .create(&key, content, &message)
                .await
                .map_err(|e| write_error(&key, e))?;
            ReconcileReport::Created {
                records: count,
                version,
            }
        }
    };

    metrics::counter!("refresh_tokens_persisted_total", "region" => region.to_string())
        .increment(count as u64);
    info!(
        region,
        records = count,
        action = report.action(),
        store = store.id(),
        "pool persisted"
    );
    Ok(report)
}

fn write_error(key: &str, e: token_store::Error) -> Error {
    if e.is_conflict() {
        Error::Conflict(format!("{key}: {e}"))
    } else {
        Error::Persistence(format!("writing {key}: {e}"))
    }
}
