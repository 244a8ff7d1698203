use crate::onchain::backoff::BackoffPolicy;
use crate::onchain::registry::{MigrationRule, ProgramEntry, ProgramRegistry, RegistryError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid endpoint url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {0} for rpc url (expected http or https)")]
    UnsupportedScheme(String),
    #[error("no websocket endpoint: set endpoint.ws_url, one of {0:?}, or an rpc url")]
    NoEndpoint(Vec<String>),
    #[error("invalid program registry: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Watched programs. Empty = mainnet defaults.
    #[serde(default)]
    pub programs: Vec<ProgramEntry>,
    #[serde(default)]
    pub migration: Option<MigrationRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Explicit WebSocket URL; wins over everything else.
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Env vars tried in order when `ws_url` is unset.
    #[serde(default = "default_ws_url_env")]
    pub ws_url_env: Vec<String>,
    /// Base RPC URL; its scheme is rewritten to ws/wss as a last resort.
    /// Also read from SOLANA_RPC_URL.
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_ws_url_env() -> Vec<String> {
    vec![
        "SOLANA_WS_URL".to_string(),
        "HELIUS_WS_URL".to_string(),
        "RPC_WS_URL".to_string(),
    ]
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_base_delay_ms() -> u64 {
    3000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            ws_url_env: default_ws_url_env(),
            rpc_url: None,
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if self.endpoint.rpc_url.is_none() {
            self.endpoint.rpc_url = std::env::var("SOLANA_RPC_URL")
                .ok()
                .filter(|v| !v.trim().is_empty());
        }
    }

    /// The WebSocket endpoint, resolved against the process environment.
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        self.endpoint.resolve(|name| std::env::var(name).ok())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.backoff.base_delay_ms),
            max_attempts: self.backoff.max_attempts,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.endpoint.ping_interval_secs.max(1))
    }

    /// The configured registry, or the mainnet one when none is configured.
    pub fn registry(&self) -> Result<ProgramRegistry, ConfigError> {
        if self.programs.is_empty() {
            return Ok(ProgramRegistry::mainnet());
        }
        let migration = self.migration.clone().or_else(|| Some(MigrationRule::default()));
        Ok(ProgramRegistry::new(self.programs.clone(), migration)?)
    }
}

impl EndpointConfig {
    /// Explicit url, then env vars in order, then the rpc url with its
    /// scheme rewritten.
    pub fn resolve<F>(&self, env: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = self.ws_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return validate(url);
        }

        for name in &self.ws_url_env {
            if let Some(url) = env(name).filter(|u| !u.trim().is_empty()) {
                return validate(&url);
            }
        }

        match self.rpc_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(rpc) => rpc_to_ws(rpc),
            None => Err(ConfigError::NoEndpoint(self.ws_url_env.clone())),
        }
    }
}

fn validate(url: &str) -> Result<String, ConfigError> {
    let url = url.trim();
    Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    Ok(url.to_string())
}

/// `https://host/?api-key=x` → `wss://host/?api-key=x`.
pub fn rpc_to_ws(rpc_url: &str) -> Result<String, ConfigError> {
    let rpc_url = rpc_url.trim();
    let (scheme, rest) = rpc_url
        .split_once("://")
        .ok_or_else(|| ConfigError::InvalidUrl {
            url: rpc_url.to_string(),
            source: url::ParseError::RelativeUrlWithoutBase,
        })?;

    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    validate(&format!("{}://{}", ws_scheme, rest))
}
