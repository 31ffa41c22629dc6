//! Account credentials as read from the per-region source resource
//!
//! The source resource is a JSON array of `{"uid": ..., "password": ...}`
//! objects. `identifier`/`secret` are accepted as aliases. Missing, null or
//! numeric values are tolerated at parse time so that one malformed entry
//! does not reject the whole file; the scheduler skips incomplete entries.

use common::Secret;
use serde::{Deserialize, Deserializer};

/// One account's identifier/secret pair.
///
/// The secret is wrapped in `Secret` so it is redacted from `Debug` output
/// and any log line that formats the credential.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawCredential")]
pub struct Credential {
    pub identifier: String,
    pub secret: Secret<String>,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: Secret::new(secret.into()),
        }
    }

    /// Whether both fields are non-empty. Incomplete credentials are never
    /// submitted to the issuer.
    pub fn is_complete(&self) -> bool {
        !self.identifier.trim().is_empty() && !self.secret.expose().trim().is_empty()
    }
}

#[derive(Deserialize)]
struct RawCredential {
    #[serde(alias = "identifier", default, deserialize_with = "lenient_string")]
    uid: String,
    #[serde(alias = "secret", default, deserialize_with = "lenient_string")]
    password: String,
}

impl From<RawCredential> for Credential {
    fn from(raw: RawCredential) -> Self {
        Credential::new(raw.uid, raw.password)
    }
}

/// Accept strings and numbers; anything else (null, objects) becomes empty.
///
/// Account ids show up as JSON numbers in some source files, and pool
/// files keep whatever type the source had.
pub fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uid_password_entries() {
        let json = r#"[{"uid":"1001","password":"pw1"},{"uid":"1002","password":"pw2"}]"#;
        let creds: Vec<Credential> = serde_json::from_str(json).unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].identifier, "1001");
        assert_eq!(creds[1].secret.expose(), "pw2");
    }

    #[test]
    fn accepts_identifier_secret_aliases() {
        let json = r#"[{"identifier":"acct","secret":"s3cret"}]"#;
        let creds: Vec<Credential> = serde_json::from_str(json).unwrap();
        assert_eq!(creds[0].identifier, "acct");
        assert_eq!(creds[0].secret.expose(), "s3cret");
    }

    #[test]
    fn numeric_uid_becomes_string() {
        let json = r#"[{"uid":123456789,"password":"pw"}]"#;
        let creds: Vec<Credential> = serde_json::from_str(json).unwrap();
        assert_eq!(creds[0].identifier, "123456789");
        assert!(creds[0].is_complete());
    }

    #[test]
    fn missing_or_null_fields_are_incomplete() {
        let json = r#"[{"uid":"1001"},{"password":"pw"},{"uid":null,"password":"pw"}]"#;
        let creds: Vec<Credential> = serde_json::from_str(json).unwrap();
        assert_eq!(creds.len(), 3);
        assert!(creds.iter().all(|c| !c.is_complete()));
    }

    #[test]
    fn debug_redacts_secret() {
        let cred = Credential::new("acct", "do-not-log");
        let debug = format!("{cred:?}");
        assert!(debug.contains("acct"));
        assert!(!debug.contains("do-not-log"), "got: {debug}");
    }
}
