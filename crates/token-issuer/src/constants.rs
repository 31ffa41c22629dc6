//! Issuer client defaults
//!
//! Everything here can be overridden from the `[issuer]` config section
//! except the accepted token field names.

/// Per-request timeout for the token endpoint, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Query parameter carrying the account identifier.
pub const DEFAULT_IDENTIFIER_PARAM: &str = "identifier";

/// Query parameter carrying the account secret.
pub const DEFAULT_SECRET_PARAM: &str = "secret";

/// Response fields that may hold the issued token, checked in order.
pub const TOKEN_FIELDS: &[&str] = &["token", "access_token"];

/// Upstream bodies quoted in error details are cut to this many characters.
pub const MAX_ERROR_BODY_CHARS: usize = 256;
