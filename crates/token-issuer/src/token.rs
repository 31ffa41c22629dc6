//! Token issuance against the external endpoint
//!
//! One GET per credential: `<endpoint>?<identifier_param>=..&<secret_param>=..`.
//! The endpoint answers with either a JSON object or an array whose first
//! element is that object; the token lives under `token` or `access_token`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::constants::{
    DEFAULT_IDENTIFIER_PARAM, DEFAULT_SECRET_PARAM, DEFAULT_TIMEOUT_SECS, MAX_ERROR_BODY_CHARS,
    TOKEN_FIELDS,
};
use crate::credentials::Credential;
use crate::error::IssueError;

/// Result of one issue call (or of a whole retried sequence, once the
/// scheduler has folded the attempts together).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Issued { identifier: String, token: String },
    Failed { identifier: String, error: IssueError },
}

impl TokenOutcome {
    pub fn identifier(&self) -> &str {
        match self {
            TokenOutcome::Issued { identifier, .. } | TokenOutcome::Failed { identifier, .. } => {
                identifier
            }
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            TokenOutcome::Issued { token, .. } => Some(token),
            TokenOutcome::Failed { .. } => None,
        }
    }

    /// Human-readable cause, present only for failures.
    pub fn error_detail(&self) -> Option<String> {
        match self {
            TokenOutcome::Issued { .. } => None,
            TokenOutcome::Failed { error, .. } => Some(error.to_string()),
        }
    }

    pub fn is_issued(&self) -> bool {
        matches!(self, TokenOutcome::Issued { .. })
    }
}

/// Something that can turn a credential into a token outcome.
///
/// Uses `Pin<Box<dyn Future>>` so the scheduler can hold an
/// `Arc<dyn TokenIssuer>` and tests can substitute scripted issuers.
pub trait TokenIssuer: Send + Sync {
    /// Issue a token for one credential. Never fails: every failure mode is
    /// reported as `TokenOutcome::Failed`.
    fn issue<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = TokenOutcome> + Send + 'a>>;
}

/// Endpoint settings for `HttpIssuer`.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub identifier_param: String,
    pub secret_param: String,
}

impl IssuerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            identifier_param: DEFAULT_IDENTIFIER_PARAM.to_string(),
            secret_param: DEFAULT_SECRET_PARAM.to_string(),
        }
    }
}

/// Issuer backed by an HTTP GET to the configured endpoint.
pub struct HttpIssuer {
    client: reqwest::Client,
    config: IssuerConfig,
}

impl HttpIssuer {
    pub fn new(client: reqwest::Client, config: IssuerConfig) -> Self {
        Self { client, config }
    }

    async fn request_token(&self, credential: &Credential) -> Result<String, IssueError> {
        if !credential.is_complete() {
            return Err(IssueError::InvalidCredential(
                "identifier and secret must be non-empty".into(),
            ));
        }

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                (
                    self.config.identifier_param.as_str(),
                    credential.identifier.as_str(),
                ),
                (
                    self.config.secret_param.as_str(),
                    credential.secret.expose().as_str(),
                ),
            ])
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IssueError::Transport(format!(
                        "request timed out after {}s",
                        self.config.timeout.as_secs()
                    ))
                } else {
                    // Strip the URL: it carries the secret as a query parameter
                    IssueError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IssueError::Transport(format!("reading body: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(IssueError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| IssueError::ResponseFormat(format!("body is not JSON: {e}")))?;

        extract_token(&json)
            .map(str::to_owned)
            .ok_or_else(|| IssueError::ResponseFormat(format!("no token field in {}", truncate(&body))))
    }
}

impl TokenIssuer for HttpIssuer {
    fn issue<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = TokenOutcome> + Send + 'a>> {
        Box::pin(async move {
            let identifier = credential.identifier.clone();
            match self.request_token(credential).await {
                Ok(token) => {
                    debug!(identifier = %identifier, "token issued");
                    TokenOutcome::Issued { identifier, token }
                }
                Err(error) => {
                    debug!(identifier = %identifier, error = %error, "token issue failed");
                    TokenOutcome::Failed { identifier, error }
                }
            }
        })
    }
}

/// Find the token in an issuer response body.
///
/// Accepts an object or a non-empty array whose first element is an object.
/// Fields in `TOKEN_FIELDS` are checked in order; the first non-empty string
/// wins.
pub fn extract_token(body: &Value) -> Option<&str> {
    let object = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    TOKEN_FIELDS.iter().find_map(|field| {
        object
            .get(*field)
            .and_then(Value::as_str)
            .filter(|token| !token.trim().is_empty())
    })
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{cut}...")
    }
}
