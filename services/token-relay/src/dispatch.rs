//! Per-call dispatch pipeline
//!
//! Claims a call number, encrypts `<identifier>:<region>`, picks the pool
//! window for that call number and POSTs the ciphertext to the target once
//! per token in the window. Per-target failures are counted, not raised,
//! and there is no retry: the next block of calls moves on to fresh tokens.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::future::join_all;
use serde::{Deserialize, Deserializer, Serialize};
use token_pool::{CallCounter, TokenRecord, WindowConfig, is_valid_region, load_pool, select_window};
use token_store::VersionedStore;
use tracing::{debug, info, warn};

use crate::cipher::PayloadCipher;
use crate::error::DispatchError;

/// Inbound `POST /dispatch` body. Fields are optional here so that missing
/// ones can be reported as a 400 with a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default, alias = "uid", deserialize_with = "identifier_field")]
    pub identifier: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, alias = "url")]
    pub target_url: Option<String>,
}

/// Numeric ids are taken as their decimal text; null or other shapes
/// become empty and fail validation as missing.
fn identifier_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    token_issuer::lenient_string(deserializer).map(Some)
}

/// A validated request, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    pub identifier: String,
    pub region: String,
    pub target_url: String,
}

impl DispatchRequest {
    /// Check required fields and fill the default region.
    pub fn validate(self, default_region: &str) -> Result<DispatchTarget, DispatchError> {
        let identifier = self
            .identifier
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DispatchError::InvalidRequest("identifier is required".into()))?;

        let target_url = self
            .target_url
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DispatchError::InvalidRequest("target_url is required".into()))?;
        if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
            return Err(DispatchError::InvalidRequest(
                "target_url must start with http:// or https://".into(),
            ));
        }

        let region = match self.region.map(|s| s.trim().to_string()) {
            Some(r) if !r.is_empty() => r,
            _ => default_region.to_string(),
        };
        if !is_valid_region(&region) {
            return Err(DispatchError::InvalidRequest(format!(
                "invalid region {region:?}"
            )));
        }

        Ok(DispatchTarget {
            identifier,
            region,
            target_url,
        })
    }
}

/// Tally of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub block_index: u64,
    /// `<first>-<last>` pool indices actually used, inclusive.
    pub tokens_used: String,
    pub call_number: u64,
}

#[derive(Serialize)]
struct TargetBody<'a> {
    payload: &'a str,
    region: &'a str,
}

pub struct Dispatcher {
    client: reqwest::Client,
    store: Arc<dyn VersionedStore>,
    cipher: PayloadCipher,
    counter: CallCounter,
    window: WindowConfig,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        client: reqwest::Client,
        store: Arc<dyn VersionedStore>,
        cipher: PayloadCipher,
        window: WindowConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            cipher,
            counter: CallCounter::new(),
            window,
            request_timeout,
        }
    }

    /// Calls claimed since startup.
    pub fn calls_made(&self) -> u64 {
        self.counter.current()
    }

    pub async fn dispatch(&self, target: &DispatchTarget) -> Result<DispatchResult, DispatchError> {
        let call_number = self.counter.next();
        let region = target.region.as_str();

        let plaintext = format!("{}:{}", target.identifier, region);
        let payload = self.cipher.encrypt(plaintext.as_bytes()).map_err(|e| {
            warn!(call_number, error = %e, "payload encryption failed");
            DispatchError::Encryption
        })?;

        let pool = load_pool(self.store.as_ref(), region)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?
            .filter(|pool| !pool.is_empty())
            .ok_or_else(|| DispatchError::NoTokens {
                region: region.to_string(),
            })?;

        let selection = select_window(call_number, pool.len(), &self.window);
        let range = selection.clamped(pool.len());
        let tokens_used = format!("{}-{}", range.start, range.end.saturating_sub(1));
        let slice = &pool.records[range];

        debug!(
            call_number,
            region,
            block_index = selection.block_index,
            tokens_used = %tokens_used,
            "dispatching to window"
        );

        let sends = slice
            .iter()
            .map(|record| self.send_one(&target.target_url, &payload, region, record));
        let results = join_all(sends).await;
        let success_count = results.iter().filter(|ok| **ok).count();
        let failure_count = results.len() - success_count;

        crate::metrics::record_token_requests(success_count, failure_count);
        info!(
            call_number,
            region,
            block_index = selection.block_index,
            tokens_used = %tokens_used,
            success_count,
            failure_count,
            "dispatch complete"
        );

        Ok(DispatchResult {
            success_count,
            failure_count,
            block_index: selection.block_index,
            tokens_used,
            call_number,
        })
    }

    /// One authorized POST; `true` on any 2xx.
    async fn send_one(
        &self,
        target_url: &str,
        payload: &str,
        region: &str,
        record: &TokenRecord,
    ) -> bool {
        let result = self
            .client
            .post(target_url)
            .bearer_auth(&record.token)
            .timeout(self.request_timeout)
            .json(&TargetBody { payload, region })
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(identifier = %record.identifier, status = %response.status(), "target rejected request");
                false
            }
            Err(e) => {
                debug!(identifier = %record.identifier, error = %e.without_url(), "target request failed");
                false
            }
        }
    }
}

/// JSON error body: `{"success":false,"error":"...","request_id":"req_..."}`
pub fn error_response(error: &DispatchError, request_id: &str) -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": error.to_string(),
        "request_id": request_id,
    });
    (
        error.status_code(),
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// JSON success body: the tally plus `"success": true`.
pub fn success_response(result: &DispatchResult, request_id: &str) -> Response {
    let body = serde_json::json!({
        "success": true,
        "success_count": result.success_count,
        "failure_count": result.failure_count,
        "block_index": result.block_index,
        "tokens_used": result.tokens_used,
        "call_number": result.call_number,
        "request_id": request_id,
    });
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
