//! Dispatch error types
//!
//! Per-target failures during a dispatch are tallied, never raised. Only
//! the faults below abort a dispatch, and each maps to one HTTP status.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("encryption failed")]
    Encryption,

    #[error("no tokens available for region {region}")]
    NoTokens { region: String },

    #[error("token store error: {0}")]
    Store(String),
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::NoTokens { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Encryption | DispatchError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::Encryption => "encryption",
            DispatchError::NoTokens { .. } => "no_tokens",
            DispatchError::Store(_) => "store",
        }
    }
}
