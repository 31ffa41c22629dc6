//! Region refresh runs
//!
//! A run walks the configured regions in order: load credentials, fan out
//! to the issuer, reconcile the result into the region's pool. One region
//! failing is recorded in its report and never stops the next region.
//! Runs are serialized by a mutex so the periodic task and an on-demand
//! trigger never reconcile the same region concurrently.

use std::sync::Arc;
use std::time::Duration;

use token_issuer::TokenIssuer;
use token_store::VersionedStore;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::reconcile::{ReconcileReport, reconcile};
use crate::scheduler::{RefreshPolicy, refresh_all};
use crate::source::load_credentials;

/// How one region's refresh ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionOutcome {
    Persisted(ReconcileReport),
    /// The credential source could not be read.
    SourceUnavailable(String),
    /// Tokens were issued but could not be written.
    PersistFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionReport {
    pub region: String,
    pub credentials: usize,
    pub issued: usize,
    pub failed: usize,
    pub outcome: RegionOutcome,
}

impl RegionReport {
    pub fn is_failure(&self) -> bool {
        !matches!(self.outcome, RegionOutcome::Persisted(_))
    }
}

pub struct Refresher {
    store: Arc<dyn VersionedStore>,
    issuer: Arc<dyn TokenIssuer>,
    policy: RefreshPolicy,
    regions: Vec<String>,
    run_lock: Mutex<()>,
}

impl Refresher {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        issuer: Arc<dyn TokenIssuer>,
        policy: RefreshPolicy,
        regions: Vec<String>,
    ) -> Self {
        Self {
            store,
            issuer,
            policy,
            regions,
            run_lock: Mutex::new(()),
        }
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Refresh every configured region, in order.
    pub async fn run_all(&self) -> Vec<RegionReport> {
        let _guard = self.run_lock.lock().await;
        let mut reports = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            reports.push(self.refresh_region(region).await);
        }
        reports
    }

    /// Refresh a single region, waiting for any run in progress.
    pub async fn run_region(&self, region: &str) -> RegionReport {
        let _guard = self.run_lock.lock().await;
        self.refresh_region(region).await
    }

    async fn refresh_region(&self, region: &str) -> RegionReport {
        let credentials = match load_credentials(self.store.as_ref(), region).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(region, error = %e, "credential source unavailable");
                return RegionReport {
                    region: region.to_string(),
                    credentials: 0,
                    issued: 0,
                    failed: 0,
                    outcome: RegionOutcome::SourceUnavailable(e.to_string()),
                };
            }
        };

        let total = credentials.len();
        info!(region, credentials = total, "refreshing region");
        let outcomes = refresh_all(self.issuer.clone(), credentials, &self.policy).await;
        let issued = outcomes.iter().filter(|o| o.is_issued()).count();
        let failed = outcomes.len() - issued;

        let outcome = match reconcile(self.store.as_ref(), region, &outcomes).await {
            Ok(report) => RegionOutcome::Persisted(report),
            Err(e) => {
                error!(region, error = %e, "failed to persist pool");
                RegionOutcome::PersistFailed(e.to_string())
            }
        };

        info!(region, issued, failed, "region refresh finished");
        RegionReport {
            region: region.to_string(),
            credentials: total,
            issued,
            failed,
            outcome,
        }
    }
}

/// Spawn a background task that refreshes all regions every `interval`.
///
/// The first run starts immediately so a fresh deployment gets a pool
/// without waiting a full interval.
pub fn spawn_refresh_task(
    refresher: Arc<Refresher>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reports = refresher.run_all().await;
            let failures = reports.iter().filter(|r| r.is_failure()).count();
            if failures > 0 {
                warn!(failures, regions = reports.len(), "periodic refresh finished with failures");
            } else {
                info!(regions = reports.len(), "periodic refresh finished");
            }
        }
    })
}
