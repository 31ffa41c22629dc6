//! Failure causes for a single token issue attempt

/// Why an issue attempt produced no token.
///
/// Carried as data inside `TokenOutcome::Failed`; never returned as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssueError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    /// The worker running this credential died before producing an outcome.
    #[error("internal error: {0}")]
    Internal(String),

    /// Derived by the scheduler once every attempt failed. `last` keeps the
    /// final cause for logging; the display string is fixed.
    #[error("failed after retries")]
    RetryExhausted { attempts: u32, last: Box<IssueError> },
}

impl IssueError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            IssueError::InvalidCredential(_)
                | IssueError::Internal(_)
                | IssueError::RetryExhausted { .. }
        )
    }

    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IssueError::InvalidCredential(_) => "invalid_credential",
            IssueError::Transport(_) => "transport",
            IssueError::Status { .. } => "status",
            IssueError::ResponseFormat(_) => "response_format",
            IssueError::Internal(_) => "internal",
            IssueError::RetryExhausted { .. } => "retry_exhausted",
        }
    }
}
