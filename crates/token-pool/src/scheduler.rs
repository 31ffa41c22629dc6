//! Bounded fan-out over the token issuer
//!
//! One task per credential in a `JoinSet`, with a semaphore capping how
//! many are talking to the issuer at once. Each task retries its own
//! credential under the configured `RetryPolicy`, so a slow or failing
//! credential never holds up the others beyond its permit.

use std::collections::HashMap;
use std::sync::Arc;

use token_issuer::{Credential, IssueError, TokenIssuer, TokenOutcome};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::retry::{RetryError, RetryPolicy};

/// Default number of credentials processed at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Maximum in-flight issue calls. Values below 1 are treated as 1.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Issue tokens for every complete credential.
///
/// Returns one outcome per complete credential, in completion order.
/// Incomplete credentials are logged and produce no outcome.
pub async fn refresh_all(
    issuer: Arc<dyn TokenIssuer>,
    credentials: Vec<Credential>,
    policy: &RefreshPolicy,
) -> Vec<TokenOutcome> {
    let semaphore = Arc::new(Semaphore::new(policy.concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let mut in_flight = HashMap::new();

    for credential in credentials {
        if !credential.is_complete() {
            warn!(
                identifier = %credential.identifier,
                "skipping credential with missing identifier or secret"
            );
            continue;
        }

        let identifier = credential.identifier.clone();
        let issuer = issuer.clone();
        let semaphore = semaphore.clone();
        let retry = policy.retry.clone();

        let handle = join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return TokenOutcome::Failed {
                    identifier: credential.identifier.clone(),
                    error: IssueError::Internal("scheduler closed".into()),
                };
            };
            issue_with_retry(issuer.as_ref(), &credential, &retry).await
        });
        in_flight.insert(handle.id(), identifier);
    }

    debug!(submitted = in_flight.len(), "refresh fan-out started");

    let mut outcomes = Vec::with_capacity(in_flight.len());
    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                in_flight.remove(&id);
                outcomes.push(outcome);
            }
            Err(e) => {
                // Keep the one-outcome-per-credential contract even when a task dies
                let identifier = in_flight.remove(&e.id()).unwrap_or_default();
                error!(identifier, error = %e, "refresh task failed");
                outcomes.push(TokenOutcome::Failed {
                    identifier,
                    error: IssueError::Internal(e.to_string()),
                });
            }
        }
    }

    outcomes
}

/// Issue a token for one credential, retrying retryable failures.
pub async fn issue_with_retry(
    issuer: &dyn TokenIssuer,
    credential: &Credential,
    retry: &RetryPolicy,
) -> TokenOutcome {
    let identifier = credential.identifier.as_str();

    let result = retry
        .run(
            |attempt| async move {
                match issuer.issue(credential).await {
                    TokenOutcome::Issued { token, .. } => {
                        metrics::counter!("refresh_attempts_total", "result" => "issued")
                            .increment(1);
                        info!(identifier, attempt, "token issued");
                        Ok(token)
                    }
                    TokenOutcome::Failed { error, .. } => {
                        metrics::counter!("refresh_attempts_total", "result" => error.kind())
                            .increment(1);
                        warn!(identifier, attempt, error = %error, "token attempt failed");
                        Err(error)
                    }
                }
            },
            IssueError::is_retryable,
        )
        .await;

    match result {
        Ok(token) => TokenOutcome::Issued {
            identifier: identifier.to_string(),
            token,
        },
        Err(RetryError::Exhausted { attempts, last }) => TokenOutcome::Failed {
            identifier: identifier.to_string(),
            error: IssueError::RetryExhausted {
                attempts,
                last: Box::new(last),
            },
        },
        Err(RetryError::Aborted { error, .. }) => TokenOutcome::Failed {
            identifier: identifier.to_string(),
            error,
        },
    }
}
