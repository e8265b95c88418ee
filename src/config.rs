//! Configuration
//!
//! Configuration structures for the signaling server and the development client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub signaling_host: String,
    pub signaling_port: u16,
    /// TLS is enabled when both `certfile` and `keyfile` are set
    #[serde(default)]
    pub certfile: Option<PathBuf>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Grant verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Shared signing secret; token checks are off when unset
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Refuse `register` without a valid token
    #[serde(default)]
    pub require_token: bool,
    /// Audience that presented tokens must name, if any
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

/// Peer directory timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: u64,
    #[serde(default = "default_expire_window_secs")]
    pub expire_window_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_key() -> String {
    "pqc-signaling".to_string()
}

fn default_token_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_active_window_secs() -> u64 {
    30
}

fn default_expire_window_secs() -> u64 {
    60
}

fn default_max_results() -> usize {
    10
}

fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            signaling_host: "0.0.0.0".to_string(),
            signaling_port: 8443,
            certfile: None,
            keyfile: None,
            max_message_size: default_max_message_size(),
            auth: AuthConfig::default(),
            directory: DirectoryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            api_secret: None,
            require_token: false,
            audience: None,
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            active_window_secs: default_active_window_secs(),
            expire_window_secs: default_expire_window_secs(),
            max_results: default_max_results(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn expire_window(&self) -> Duration {
        Duration::from_secs(self.expire_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.expire_window_secs <= self.directory.active_window_secs {
            return Err(ConfigError::Invalid(format!(
                "expire_window_secs ({}) must exceed active_window_secs ({})",
                self.directory.expire_window_secs, self.directory.active_window_secs
            )));
        }
        if self.directory.max_results == 0 {
            return Err(ConfigError::Invalid("max_results must be at least 1".to_string()));
        }
        if self.certfile.is_some() != self.keyfile.is_some() {
            return Err(ConfigError::Invalid(
                "certfile and keyfile must be set together".to_string(),
            ));
        }
        let has_secret = self
            .auth
            .api_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if self.auth.require_token && !has_secret {
            return Err(ConfigError::Invalid(
                "require_token needs a non-empty api_secret".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.certfile.is_some() && self.keyfile.is_some()
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_host: String,
    pub signaling_port: u16,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_user_id")]
    pub default_user_id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_user_id() -> String {
    "peer".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            signaling_port: 8443,
            use_tls: false,
            default_user_id: default_user_id(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
