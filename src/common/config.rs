//! Configuration for coordkit components
//!
//! Loaded from an optional TOML file overlaid with `COORDKIT__*` environment
//! variables (e.g. `COORDKIT__DISCOVERY__REFRESH_INTERVAL_MS=5000`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "coordkit";
const ENV_PREFIX: &str = "COORDKIT";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ensemble connection settings
    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// Ensemble server settings (coordkit-ensemble binary)
    #[serde(default)]
    pub server: ServerConfig,

    /// Namespace resolution
    #[serde(default)]
    pub namespaces: NamespaceConfig,

    /// Service discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Default caller-side wait for a single operation
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_request_timeout() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ensemble: EnsembleConfig::default(),
            server: ServerConfig::default(),
            namespaces: NamespaceConfig::default(),
            discovery: DiscoveryConfig::default(),
            request_timeout_ms: default_request_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load `coordkit.toml` from the working directory (if present) plus environment overrides
    pub fn load() -> crate::Result<Self> {
        Self::build(config::File::with_name(DEFAULT_CONFIG_FILE).required(false))
    }

    /// Load an explicit config file plus environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        Self::build(config::File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> crate::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.ensemble.address.trim().is_empty() {
            return Err(crate::Error::InvalidConfig(
                "ensemble.address cannot be empty".into(),
            ));
        }
        if self.discovery.refresh_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "discovery.refresh_interval_ms must be positive".into(),
            ));
        }
        crate::common::path::validate_path(&self.discovery.base_path)?;
        for prefix in self.namespaces.prefixes.values() {
            crate::common::path::validate_path(prefix)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Ensemble connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Ensemble address (e.g. `http://127.0.0.1:2181`)
    #[serde(default = "default_ensemble_address")]
    pub address: String,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_ensemble_address() -> String {
    "http://127.0.0.1:2181".to_string()
}
fn default_connect_timeout() -> u64 {
    5_000
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            address: default_ensemble_address(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl EnsembleConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Ensemble server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 2181))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Namespace-to-prefix mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace applied when a caller passes none
    #[serde(default)]
    pub default: Option<String>,

    /// Explicit prefixes; unmapped namespaces resolve under `/<namespace>`
    #[serde(default)]
    pub prefixes: HashMap<String, String>,
}

/// Service discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Base path under which services register
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Default weight refresh interval
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
}

fn default_base_path() -> String {
    "/services".to_string()
}
fn default_refresh_interval() -> u64 {
    30_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            refresh_interval_ms: default_refresh_interval(),
        }
    }
}

impl DiscoveryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}
