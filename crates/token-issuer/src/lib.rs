//! Token issuer client
//!
//! Calls the third-party token endpoint for one credential and normalizes
//! every response into a `TokenOutcome`. This crate never surfaces an error
//! to its caller: transport failures, bad statuses and unrecognized bodies
//! are all captured as `TokenOutcome::Failed` so the refresh scheduler can
//! decide whether to retry.
//!
//! Flow:
//! 1. Credentials are read from the per-region source resource (`Credential`)
//! 2. `HttpIssuer::issue()` performs one GET with a fixed timeout
//! 3. The body is searched for a token field (`token`, then `access_token`)
//! 4. The scheduler in `token-pool` retries `Failed` outcomes

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, lenient_string};
pub use error::IssueError;
pub use token::{HttpIssuer, IssuerConfig, TokenIssuer, TokenOutcome, extract_token};
