//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (the payload cipher key and the GitHub store token) are read from
//! env vars or `*_file` paths and never stored in the TOML directly.

use common::{Secret, resolve_secret};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use token_issuer::{DEFAULT_IDENTIFIER_PARAM, DEFAULT_SECRET_PARAM, DEFAULT_TIMEOUT_SECS};
use token_pool::{Backoff, RefreshPolicy, RetryPolicy, WindowConfig, is_valid_region};

/// Env var holding the base64 payload cipher key.
pub const CIPHER_KEY_ENV: &str = "TOKEN_RELAY_CIPHER_KEY";

/// Env var holding the GitHub store token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

const DEFAULT_CONFIG_FILE: &str = "token-relay.toml";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Admin listener; disabled when the section is absent.
    #[serde(default)]
    pub admin: Option<AdminConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    pub issuer: IssuerSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub cipher: CipherConfig,
}

/// Public dispatch listener
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Github,
}

/// Where credential sources and token pools live
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Root directory for the file backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// `owner/name` for the github backend
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Path to a file containing the GitHub token (alternative to GITHUB_TOKEN)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: default_store_path(),
            repository: None,
            branch: None,
            api_url: default_github_api_url(),
            token_file: None,
            token: None,
        }
    }
}

/// Token endpoint settings
#[derive(Debug, Deserialize)]
pub struct IssuerSection {
    pub endpoint: String,
    #[serde(default = "default_issuer_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_identifier_param")]
    pub identifier_param: String,
    #[serde(default = "default_secret_param")]
    pub secret_param: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshSection {
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Double the delay after each failed attempt, up to this many seconds
    #[serde(default)]
    pub max_retry_delay_secs: Option<u64>,
    /// Periodic refresh in `serve`; disabled when unset
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            max_retry_delay_secs: None,
            interval_secs: None,
        }
    }
}

impl RefreshSection {
    pub fn policy(&self) -> RefreshPolicy {
        let delay = Duration::from_secs(self.retry_delay_secs);
        let backoff = match self.max_retry_delay_secs {
            Some(max) => Backoff::Exponential {
                initial: delay,
                max: Duration::from_secs(max),
            },
            None => Backoff::Fixed(delay),
        };
        RefreshPolicy {
            concurrency: self.concurrency,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_region")]
    pub default_region: String,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_calls_per_block")]
    pub calls_per_block: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            block_size: default_block_size(),
            calls_per_block: default_calls_per_block(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DispatchSection {
    pub fn window(&self) -> WindowConfig {
        WindowConfig {
            block_size: self.block_size,
            calls_per_block: self.calls_per_block,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CipherConfig {
    /// Path to a file containing the base64 key (alternative to TOKEN_RELAY_CIPHER_KEY)
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(skip)]
    pub key: Option<Secret<String>>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_github_api_url() -> String {
    token_store::github::DEFAULT_API_URL.to_string()
}

fn default_issuer_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_identifier_param() -> String {
    DEFAULT_IDENTIFIER_PARAM.to_string()
}

fn default_secret_param() -> String {
    DEFAULT_SECRET_PARAM.to_string()
}

fn default_regions() -> Vec<String> {
    vec!["bd".into(), "ind".into(), "sg".into()]
}

fn default_concurrency() -> usize {
    token_pool::scheduler::DEFAULT_CONCURRENCY
}

fn default_max_attempts() -> u32 {
    token_pool::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay() -> u64 {
    token_pool::retry::DEFAULT_RETRY_DELAY.as_secs()
}

fn default_region() -> String {
    "uz".into()
}

fn default_block_size() -> usize {
    token_pool::window::DEFAULT_BLOCK_SIZE
}

fn default_calls_per_block() -> u64 {
    token_pool::window::DEFAULT_CALLS_PER_BLOCK
}

fn default_request_timeout() -> u64 {
    10
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn non_zero(value: u64, name: &str) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, validate it, then resolve secrets.
    ///
    /// Secret resolution order for each secret:
    /// 1. env var (`TOKEN_RELAY_CIPHER_KEY`, `GITHUB_TOKEN`)
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        config.cipher.key = resolve_secret(CIPHER_KEY_ENV, config.cipher.key_file.as_deref())?;

        if config.store.backend == StoreBackend::Github {
            config.store.token =
                resolve_secret(GITHUB_TOKEN_ENV, config.store.token_file.as_deref())?;
            if config.store.token.is_none() {
                return Err(common::Error::Config(format!(
                    "github store needs a token: set {GITHUB_TOKEN_ENV} or store.token_file"
                )));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        non_zero(self.server.max_connections as u64, "server.max_connections")?;

        if !is_http_url(&self.issuer.endpoint) {
            return Err(common::Error::Config(format!(
                "issuer.endpoint must start with http:// or https://, got: {}",
                self.issuer.endpoint
            )));
        }
        non_zero(self.issuer.timeout_secs, "issuer.timeout_secs")?;

        if self.refresh.regions.is_empty() {
            return Err(common::Error::Config(
                "refresh.regions must list at least one region".into(),
            ));
        }
        for region in self.refresh.regions.iter().chain([&self.dispatch.default_region]) {
            if !is_valid_region(region) {
                return Err(common::Error::Config(format!(
                    "invalid region code {region:?}: use letters, digits, '-' or '_'"
                )));
            }
        }
        non_zero(self.refresh.concurrency as u64, "refresh.concurrency")?;
        non_zero(self.refresh.max_attempts.into(), "refresh.max_attempts")?;
        if let Some(interval) = self.refresh.interval_secs {
            non_zero(interval, "refresh.interval_secs")?;
        }

        non_zero(self.dispatch.block_size as u64, "dispatch.block_size")?;
        non_zero(self.dispatch.calls_per_block, "dispatch.calls_per_block")?;
        non_zero(
            self.dispatch.request_timeout_secs,
            "dispatch.request_timeout_secs",
        )?;

        if self.store.backend == StoreBackend::Github {
            let valid_repo = self
                .store
                .repository
                .as_deref()
                .is_some_and(|r| r.split('/').filter(|p| !p.is_empty()).count() == 2);
            if !valid_repo {
                return Err(common::Error::Config(
                    "github store needs store.repository = \"owner/name\"".into(),
                ));
            }
            if !is_http_url(&self.store.api_url) {
                return Err(common::Error::Config(format!(
                    "store.api_url must start with http:// or https://, got: {}",
                    self.store.api_url
                )));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    const MINIMAL: &str = r#"
[server]
listen_addr = "127.0.0.1:8080"

[issuer]
endpoint = "https://issuer.example.com/token"
"#;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn load(contents: &str) -> common::Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, contents);
        Config::load(&path)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CIPHER_KEY_ENV) };

        let config = load(MINIMAL).unwrap();
        assert_eq!(config.server.max_connections, 1000);
        assert!(config.admin.is_none());
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.path, PathBuf::from("data"));
        assert_eq!(config.issuer.timeout_secs, 10);
        assert_eq!(config.issuer.identifier_param, "identifier");
        assert_eq!(config.refresh.regions, ["bd", "ind", "sg"]);
        assert_eq!(config.refresh.concurrency, 5);
        assert_eq!(config.refresh.max_attempts, 3);
        assert_eq!(config.refresh.retry_delay_secs, 3);
        assert!(config.refresh.interval_secs.is_none());
        assert_eq!(config.dispatch.default_region, "uz");
        assert_eq!(config.dispatch.window(), WindowConfig::default());
        assert_eq!(config.dispatch.request_timeout_secs, 10);
        assert!(config.cipher.key.is_none());
    }

    #[test]
    fn full_config_parses() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CIPHER_KEY_ENV) };

        let config = load(
            r#"
[server]
listen_addr = "0.0.0.0:8080"
max_connections = 200

[admin]
listen_addr = "127.0.0.1:9090"

[store]
backend = "file"
path = "/var/lib/token-relay"

[issuer]
endpoint = "http://issuer.internal/token"
identifier_param = "uid"
secret_param = "password"

[refresh]
regions = ["bd"]
concurrency = 2
max_attempts = 4
retry_delay_secs = 1
max_retry_delay_secs = 8
interval_secs = 3600

[dispatch]
default_region = "sg"
block_size = 10
calls_per_block = 3
"#,
        )
        .unwrap();

        assert_eq!(config.admin.unwrap().listen_addr.port(), 9090);
        assert_eq!(config.issuer.secret_param, "password");
        assert_eq!(config.refresh.interval_secs, Some(3600));
        let policy = config.refresh.policy();
        assert_eq!(policy.concurrency, 2);
        assert_eq!(policy.retry.max_attempts, 4);
        assert_eq!(
            policy.retry.backoff,
            Backoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(8)
            }
        );
        assert_eq!(config.dispatch.window().calls_per_block, 3);
    }

    #[test]
    fn default_refresh_policy_is_fixed_delay() {
        let policy = RefreshSection::default().policy();
        assert_eq!(policy.retry.backoff, Backoff::Fixed(Duration::from_secs(3)));
    }

    #[test]
    fn missing_file_is_error() {
        assert!(Config::load(Path::new("/nonexistent/path/config.toml")).is_err());
    }

    #[test]
    fn invalid_toml_is_error() {
        assert!(load("not valid {{{{ toml").is_err());
    }

    #[test]
    fn issuer_endpoint_must_be_http() {
        let err = load(
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[issuer]
endpoint = "issuer.example.com/token"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("issuer.endpoint must start with http"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        for (section, line) in [
            ("server", "max_connections = 0"),
            ("refresh", "concurrency = 0"),
            ("refresh", "max_attempts = 0"),
            ("dispatch", "block_size = 0"),
            ("dispatch", "calls_per_block = 0"),
            ("dispatch", "request_timeout_secs = 0"),
        ] {
            let contents = if section == "server" {
                format!(
                    "[server]\nlisten_addr = \"127.0.0.1:8080\"\n{line}\n\n[issuer]\nendpoint = \"https://i.example\"\n"
                )
            } else {
                format!("{MINIMAL}\n[{section}]\n{line}\n")
            };
            let err = load(&contents).unwrap_err();
            assert!(
                err.to_string().contains("must be greater than 0"),
                "{section}.{line}: {err}"
            );
        }
    }

    #[test]
    fn bad_region_code_is_rejected() {
        let err = load(&format!("{MINIMAL}\n[refresh]\nregions = [\"../x\"]\n")).unwrap_err();
        assert!(err.to_string().contains("invalid region code"));

        let err = load(&format!("{MINIMAL}\n[refresh]\nregions = []\n")).unwrap_err();
        assert!(err.to_string().contains("at least one region"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(load(&format!("{MINIMAL}\n[store]\nbackend = \"s3\"\n")).is_err());
    }

    #[test]
    fn github_backend_requires_repository_and_token() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(GITHUB_TOKEN_ENV) };

        let err = load(&format!("{MINIMAL}\n[store]\nbackend = \"github\"\n")).unwrap_err();
        assert!(err.to_string().contains("store.repository"));

        let err = load(&format!(
            "{MINIMAL}\n[store]\nbackend = \"github\"\nrepository = \"acme/tokens\"\n"
        ))
        .unwrap_err();
        assert!(err.to_string().contains(GITHUB_TOKEN_ENV));

        unsafe { set_env(GITHUB_TOKEN_ENV, "ghp_env") };
        let config = load(&format!(
            "{MINIMAL}\n[store]\nbackend = \"github\"\nrepository = \"acme/tokens\"\n"
        ))
        .unwrap();
        assert_eq!(config.store.token.as_ref().unwrap().expose(), "ghp_env");
        assert_eq!(config.store.api_url, "https://api.github.com");
        unsafe { remove_env(GITHUB_TOKEN_ENV) };
    }

    #[test]
    fn cipher_key_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CIPHER_KEY_ENV) };

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("cipher.key");
        std::fs::write(&key_path, "a2V5LWZyb20tZmlsZQ==\n").unwrap();
        let path = write_config(
            &dir,
            &format!("{MINIMAL}\n[cipher]\nkey_file = \"{}\"\n", key_path.display()),
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.cipher.key.as_ref().unwrap().expose(),
            "a2V5LWZyb20tZmlsZQ=="
        );
    }

    #[test]
    fn cipher_key_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("cipher.key");
        std::fs::write(&key_path, "from-file").unwrap();
        let path = write_config(
            &dir,
            &format!("{MINIMAL}\n[cipher]\nkey_file = \"{}\"\n", key_path.display()),
        );

        unsafe { set_env(CIPHER_KEY_ENV, "from-env") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.cipher.key.as_ref().unwrap().expose(), "from-env");
        unsafe { remove_env(CIPHER_KEY_ENV) };
    }

    #[test]
    fn example_config_loads() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CIPHER_KEY_ENV) };

        let config = load(include_str!("../token-relay.example.toml")).unwrap();
        assert_eq!(config.server.listen_addr.port(), 5000);
        assert_eq!(config.issuer.identifier_param, "uid");
        assert_eq!(config.dispatch.window(), WindowConfig::default());
        assert!(config.admin.is_some());
    }

    #[test]
    fn nonexistent_key_file_is_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CIPHER_KEY_ENV) };
        let err = load(&format!(
            "{MINIMAL}\n[cipher]\nkey_file = \"/nonexistent/cipher.key\"\n"
        ))
        .unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("token-relay.toml"));

        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
