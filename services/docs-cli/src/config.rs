//! Configuration types and loading
//!
//! The file path comes from `--config` or CONFIG_PATH (see `cli`).
//! The client secret is loaded from the DOCS_CLIENT_SECRET env var or
//! client_secret_file, never stored in the TOML directly.

use common::Secret;
use docs_auth::AuthConfig;
use docs_client::RetryPolicy;
use docs_session::TokenSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::TransportConfig;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthSection,
}

/// Document API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// OAuth client settings
#[derive(Debug, Deserialize)]
pub struct AuthSection {
    pub token_url: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to DOCS_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub redirect_uri: String,
    pub credentials_path: PathBuf,
    #[serde(default = "default_min_validity")]
    pub min_validity_secs: u64,
}

fn default_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    100
}

fn default_min_validity() -> u64 {
    300
}

fn require_http(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    Err(common::Error::Config(format!(
        "{field} must start with http:// or https://, got: {value}"
    )))
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. DOCS_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http("base_url", &config.api.base_url)?;
        require_http("token_url", &config.auth.token_url)?;

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if config.api.connect_timeout_secs == 0 {
            return Err(common::Error::Config(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }

        // A blank env var counts as unset
        let from_env = std::env::var("DOCS_CLIENT_SECRET")
            .ok()
            .map(Secret::from)
            .filter(|s| !s.is_blank());

        if let Some(secret) = from_env {
            config.auth.client_secret = Some(secret);
        } else if let Some(ref secret_file) = config.auth.client_secret_file {
            let contents = Secret::new(std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?);
            if !contents.is_blank() {
                config.auth.client_secret = Some(Secret::new(contents.expose().trim().to_owned()));
            }
        }

        Ok(config)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.api.connect_timeout_secs),
            timeout: Duration::from_secs(self.api.timeout_secs),
            user_agent: self.api.user_agent.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.api.max_retries,
            Duration::from_millis(self.api.retry_delay_ms),
        )
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            min_validity: Duration::from_secs(self.auth.min_validity_secs),
        }
    }

    /// OAuth client configuration. Fails when no client secret was found.
    pub fn auth_config(&self) -> common::Result<AuthConfig> {
        let secret = self.auth.client_secret.clone().ok_or_else(|| {
            common::Error::Config(
                "client secret missing: set DOCS_CLIENT_SECRET or client_secret_file".into(),
            )
        })?;
        Ok(AuthConfig::new(
            self.auth.token_url.clone(),
            self.auth.client_id.clone(),
            secret,
            self.auth.redirect_uri.clone(),
        ))
    }
}
