//! token-relay
//!
//! Token refresh and dispatch service. One binary:
//! 1. Refreshes per-region token pools from credential sources
//!    (`token-relay refresh`, or periodically under `serve`)
//! 2. Serves `POST /dispatch`, fanning each call out to a rotating window
//!    of the region's pool with an encrypted payload
//! 3. Exposes `/status`, `/health`, `/metrics` and an optional admin API

mod admin;
mod cipher;
mod config;
mod dispatch;
mod error;
mod metrics;

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use token_issuer::{HttpIssuer, IssuerConfig};
use token_pool::{Refresher, spawn_refresh_task};
use token_store::{FileStore, GithubConfig, GithubStore, VersionedStore};

use crate::cipher::PayloadCipher;
use crate::config::{CIPHER_KEY_ENV, Config, StoreBackend, StoreConfig};
use crate::dispatch::{DispatchRequest, Dispatcher, error_response, success_response};
use crate::error::DispatchError;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_MESSAGE: &str = "Server is running smoothly";

/// State shared by the public API handlers.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    default_region: Arc<str>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Public API router.
///
/// A concurrency limit layer caps simultaneous requests at `max_connections`;
/// each dispatch already fans out to up to a full window of targets.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/dispatch", post(dispatch_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    Refresh,
}

/// Parse `[serve|refresh] [--config PATH]`.
fn parse_args(args: &[String]) -> Result<(Command, Option<&str>)> {
    let mut command = None;
    let mut config_path = None;
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config requires a path")?;
                config_path = Some(path.as_str());
            }
            "serve" if command.is_none() => command = Some(Command::Serve),
            "refresh" if command.is_none() => command = Some(Command::Refresh),
            other => anyhow::bail!("unexpected argument: {other} (usage: token-relay [serve|refresh] [--config PATH])"),
        }
    }
    Ok((command.unwrap_or(Command::Serve), config_path))
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; filter from LOG_LEVEL, then RUST_LOG, then "info"
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (command, cli_config_path) = parse_args(&args)?;

    info!(?command, "starting token-relay");

    // Recorder first, so refresh and dispatch metrics are never dropped
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        store = ?config.store.backend,
        issuer = %config.issuer.endpoint,
        regions = ?config.refresh.regions,
        "configuration loaded"
    );

    let client = reqwest::Client::new();
    let store = build_store(&config.store, client.clone()).await?;
    let refresher = Arc::new(build_refresher(&config, store.clone(), client.clone()));

    match command {
        Command::Refresh => run_refresh_once(&refresher).await,
        Command::Serve => serve(config, store, refresher, client, prometheus_handle).await,
    }
}

async fn build_store(
    config: &StoreConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn VersionedStore>> {
    match config.backend {
        StoreBackend::File => {
            let store = FileStore::open(config.path.clone())
                .await
                .with_context(|| format!("failed to open store at {}", config.path.display()))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Github => {
            let repository = config
                .repository
                .clone()
                .context("store.repository is required for the github backend")?;
            let token = config
                .token
                .clone()
                .context("github store token was not resolved")?;
            Ok(Arc::new(GithubStore::new(
                client,
                GithubConfig {
                    api_url: config.api_url.clone(),
                    repository,
                    branch: config.branch.clone(),
                    token,
                },
            )))
        }
    }
}

fn build_refresher(
    config: &Config,
    store: Arc<dyn VersionedStore>,
    client: reqwest::Client,
) -> Refresher {
    let issuer = HttpIssuer::new(
        client,
        IssuerConfig {
            endpoint: config.issuer.endpoint.clone(),
            timeout: Duration::from_secs(config.issuer.timeout_secs),
            identifier_param: config.issuer.identifier_param.clone(),
            secret_param: config.issuer.secret_param.clone(),
        },
    );
    Refresher::new(
        store,
        Arc::new(issuer),
        config.refresh.policy(),
        config.refresh.regions.clone(),
    )
}

/// One refresh run over every configured region. Fails if any region failed.
async fn run_refresh_once(refresher: &Refresher) -> Result<()> {
    let reports = refresher.run_all().await;
    for report in &reports {
        info!(report = %admin::report_json(report), "region report");
    }
    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| r.is_failure())
        .map(|r| r.region.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("refresh failed for regions: {}", failed.join(", "));
    }
    info!(regions = reports.len(), "refresh complete");
    Ok(())
}

async fn serve(
    config: Config,
    store: Arc<dyn VersionedStore>,
    refresher: Arc<Refresher>,
    client: reqwest::Client,
    prometheus: PrometheusHandle,
) -> Result<()> {
    let key = config.cipher.key.as_ref().with_context(|| {
        format!("payload cipher key missing: set {CIPHER_KEY_ENV} or [cipher] key_file")
    })?;
    let cipher = PayloadCipher::from_base64_key(key).context("invalid payload cipher key")?;

    let dispatcher = Dispatcher::new(
        client,
        store.clone(),
        cipher,
        config.dispatch.window(),
        Duration::from_secs(config.dispatch.request_timeout_secs),
    );

    let app_state = AppState {
        dispatcher: Arc::new(dispatcher),
        default_region: Arc::from(config.dispatch.default_region.as_str()),
        started_at: Instant::now(),
        prometheus,
    };
    let app = build_router(app_state, config.server.max_connections);

    let refresh_task = config.refresh.interval_secs.map(|secs| {
        info!(interval_secs = secs, "periodic refresh enabled");
        spawn_refresh_task(refresher.clone(), Duration::from_secs(secs))
    });

    let admin_task = match &config.admin {
        Some(admin_config) => {
            let listener = TcpListener::bind(admin_config.listen_addr)
                .await
                .with_context(|| format!("failed to bind admin to {}", admin_config.listen_addr))?;
            info!(addr = %admin_config.listen_addr, "admin API listening");
            let admin_app =
                admin::build_admin_router(admin::AdminState::new(refresher.clone(), store));
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, admin_app).await {
                    error!(error = %e, "admin server failed");
                }
            }))
        }
        None => None,
    };

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Drain clock starts at the signal; the server keeps running until then.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    if let Some(task) = refresh_task {
        task.abort();
    }
    if let Some(task) = admin_task {
        task.abort();
    }

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// POST /dispatch
///
/// Malformed bodies and missing fields are rejected before a call number is
/// claimed, so they never shift the window rotation.
async fn dispatch_handler(
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let started = Instant::now();

    let response = handle_dispatch(&state, payload, &request_id).await;

    metrics::record_dispatch(response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn handle_dispatch(
    state: &AppState,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
    request_id: &str,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = DispatchError::InvalidRequest(rejection.body_text());
            warn!(error = %err, "rejected dispatch request");
            return error_response(&err, request_id);
        }
    };

    let target = match request.validate(&state.default_region) {
        Ok(target) => target,
        Err(err) => {
            warn!(error = %err, "rejected dispatch request");
            return error_response(&err, request_id);
        }
    };

    match state.dispatcher.dispatch(&target).await {
        Ok(result) => success_response(&result, request_id),
        Err(err) => {
            error!(error = %err, kind = err.kind(), region = %target.region, "dispatch failed");
            error_response(&err, request_id)
        }
    }
}

/// GET /status: read-only call counter.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "calls_made": state.dispatcher.calls_made(),
        "message": STATUS_MESSAGE,
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "healthy",
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "calls_made": state.dispatcher.calls_made(),
        })
        .to_string(),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
