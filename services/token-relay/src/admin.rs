//! Admin API for pool maintenance
//!
//! Runs on a separate listener (configured under `[admin]`) and is meant to
//! stay off the public network. Tokens are never returned.
//!
//! Endpoints:
//! - `POST /admin/refresh`: refresh all regions now (or one with `?region=`)
//! - `GET /admin/pools/{region}`: pool size and version tag

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use token_pool::{RegionOutcome, RegionReport, Refresher, is_valid_region, load_pool};
use token_store::VersionedStore;
use tracing::{info, warn};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    refresher: Arc<Refresher>,
    store: Arc<dyn VersionedStore>,
}

impl AdminState {
    pub fn new(refresher: Arc<Refresher>, store: Arc<dyn VersionedStore>) -> Self {
        Self { refresher, store }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/refresh", post(trigger_refresh))
        .route("/admin/pools/{region}", get(pool_status))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> axum::response::Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// JSON view of a region report. Failure causes are included; tokens never are.
pub fn report_json(report: &RegionReport) -> serde_json::Value {
    let (status, records, error) = match &report.outcome {
        RegionOutcome::Persisted(r) => (r.action(), r.records(), None),
        RegionOutcome::SourceUnavailable(e) => ("source_unavailable", 0, Some(e.as_str())),
        RegionOutcome::PersistFailed(e) => ("persist_failed", 0, Some(e.as_str())),
    };
    serde_json::json!({
        "region": report.region,
        "status": status,
        "credentials": report.credentials,
        "issued": report.issued,
        "failed": report.failed,
        "records_written": records,
        "error": error,
    })
}

#[derive(Deserialize)]
struct RefreshQuery {
    region: Option<String>,
}

/// POST /admin/refresh: run a refresh and wait for it.
///
/// Waits behind any run already in progress. Responds 500 when any region
/// failed to load or persist, with the per-region reports either way.
async fn trigger_refresh(
    State(state): State<AdminState>,
    Query(query): Query<RefreshQuery>,
) -> impl IntoResponse {
    let reports = match query.region {
        Some(region) if !is_valid_region(&region) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("invalid region {region:?}") }),
            );
        }
        Some(region) => vec![state.refresher.run_region(&region).await],
        None => state.refresher.run_all().await,
    };

    let failures = reports.iter().filter(|r| r.is_failure()).count();
    if failures > 0 {
        warn!(failures, "admin-triggered refresh finished with failures");
    } else {
        info!(regions = reports.len(), "admin-triggered refresh finished");
    }

    let status = if failures > 0 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    json_response(
        status,
        serde_json::json!({
            "failures": failures,
            "reports": reports.iter().map(report_json).collect::<Vec<_>>(),
        }),
    )
}

/// GET /admin/pools/{region}: pool size and version, never tokens.
async fn pool_status(
    State(state): State<AdminState>,
    Path(region): Path<String>,
) -> impl IntoResponse {
    if !is_valid_region(&region) {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": format!("invalid region {region:?}") }),
        );
    }

    match load_pool(state.store.as_ref(), &region).await {
        Ok(Some(pool)) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "region": region,
                "size": pool.len(),
                "version": pool.version.as_str(),
                "store": state.store.id(),
            }),
        ),
        Ok(None) => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": format!("no pool for region {region}") }),
        ),
        Err(e) => {
            warn!(region, error = %e, "failed to load pool");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            )
        }
    }
}
