//! Service configuration
//!
//! Layered from an optional TOML file and `CREW_HEALTH__*` environment
//! variables (`CREW_HEALTH__SERVER__PORT=9000`).

use crate::error::{HealthError, Result};
use crate::session::Role;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// Config file used when `CREW_HEALTH_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/crew-health.toml";

/// Accepted range for the redirect debounce
pub const REDIRECT_DELAY_RANGE_MS: (u64, u64) = (500, 1000);

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body limit in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Access guard timing
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Debounce before a redirect is acted on
    #[serde(default = "default_redirect_delay_ms")]
    pub redirect_delay_ms: u64,

    /// How long a request waits for the session to resolve
    #[serde(default = "default_loading_grace_ms")]
    pub loading_grace_ms: u64,
}

fn default_redirect_delay_ms() -> u64 {
    750
}

fn default_loading_grace_ms() -> u64 {
    3000
}

impl GuardConfig {
    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }

    pub fn loading_grace(&self) -> Duration {
        Duration::from_millis(self.loading_grace_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            redirect_delay_ms: default_redirect_delay_ms(),
            loading_grace_ms: default_loading_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mock,
    Rest,
}

/// Seeded account for the mock provider
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub email: String,
    pub password: SecretString,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Upper bound for each provider call
    #[serde(default = "default_auth_timeout_ms")]
    pub timeout_ms: u64,

    /// Role for identities that never chose one here
    #[serde(default = "default_fallback_role")]
    pub fallback_role: Role,

    /// Crew member for astronauts that did not pick one
    #[serde(default = "default_crew_id")]
    pub default_crew_id: String,

    /// Artificial sign-in delay of the mock provider
    #[serde(default = "default_simulated_latency_ms")]
    pub simulated_latency_ms: u64,

    /// Mock provider: accept any non-empty credentials
    #[serde(default)]
    pub accept_any: bool,

    /// REST provider endpoint
    #[serde(default)]
    pub base_url: Option<String>,

    /// REST provider API key
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Mock
}

fn default_auth_timeout_ms() -> u64 {
    10_000
}

fn default_fallback_role() -> Role {
    Role::Doctor
}

fn default_crew_id() -> String {
    "ast-001".to_string()
}

fn default_simulated_latency_ms() -> u64 {
    1000
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_ms: default_auth_timeout_ms(),
            fallback_role: default_fallback_role(),
            default_crew_id: default_crew_id(),
            simulated_latency_ms: default_simulated_latency_ms(),
            accept_any: false,
            base_url: None,
            api_key: None,
            accounts: vec![],
        }
    }
}

/// Session persistence
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// JSON file for role records; in-memory when unset
    #[serde(default)]
    pub path: Option<String>,
}

impl Config {
    /// Load from the file named by `CREW_HEALTH_CONFIG` (or the default path)
    /// and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("CREW_HEALTH_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from `path` (missing file is fine) and the environment
    pub fn load_from(path: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("CREW_HEALTH").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse an inline TOML document
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(raw, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (min, max) = REDIRECT_DELAY_RANGE_MS;
        if !(min..=max).contains(&self.guard.redirect_delay_ms) {
            return Err(HealthError::Config(format!(
                "guard.redirect_delay_ms must be between {} and {}, got {}",
                min, max, self.guard.redirect_delay_ms
            )));
        }
        if self.guard.loading_grace_ms <= self.guard.redirect_delay_ms {
            return Err(HealthError::Config(
                "guard.loading_grace_ms must be longer than guard.redirect_delay_ms".to_string(),
            ));
        }
        if self.auth.timeout_ms == 0 {
            return Err(HealthError::Config("auth.timeout_ms must be positive".to_string()));
        }
        if self.auth.default_crew_id.trim().is_empty() {
            return Err(HealthError::Config("auth.default_crew_id cannot be empty".to_string()));
        }
        if self.auth.provider == ProviderKind::Rest
            && (self.auth.base_url.is_none() || self.auth.api_key.is_none())
        {
            return Err(HealthError::Config(
                "auth.base_url and auth.api_key are required for the rest provider".to_string(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(HealthError::Config("server.max_body_bytes must be positive".to_string()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
