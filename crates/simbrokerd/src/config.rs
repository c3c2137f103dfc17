//! Broker configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file
//! (`--config` or `$XDG_CONFIG_HOME/simbroker/broker.toml`), environment
//! variables, then command line flags applied by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simbroker_core::{HostingMode, Platform, PortRange, DEFAULT_BROKER_PORT};
use thiserror::Error;

/// Default address the broker binds to.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Port draws attempted before `start_service` gives up.
pub const DEFAULT_MAX_ALLOCATION_ATTEMPTS: u32 = 64;

pub const ENV_PORT: &str = "SIMBROKER_PORT";
pub const ENV_BIND: &str = "SIMBROKER_BIND";
pub const ENV_INSTALL_ROOT: &str = "SIMBROKER_INSTALL_ROOT";

/// Broker daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address the broker listens on
    pub bind_host: String,

    /// Well-known broker port
    pub port: u16,

    /// Range session host ports are drawn from
    pub port_range: PortRange,

    /// How session hosts are executed
    pub hosting: HostingMode,

    /// Installation root of the simulation application
    pub install_root: Option<PathBuf>,

    /// Idle timeout for client connections, in seconds.
    ///
    /// Absent means unbounded: a client may legitimately wait hours on a
    /// solve running over another connection.
    pub idle_timeout_secs: Option<u64>,

    pub max_allocation_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            port_range: PortRange::default(),
            hosting: HostingMode::default_for(Platform::current()),
            install_root: None,
            idle_timeout_secs: None,
            max_allocation_attempts: DEFAULT_MAX_ALLOCATION_ATTEMPTS,
        }
    }
}

impl BrokerConfig {
    /// Default config file location, if a config directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("simbroker").join("broker.toml"))
    }

    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing default file yields the defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Applies `SIMBROKER_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup (environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: ENV_PORT.to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.bind_host = bind;
        }
        if let Some(root) = lookup(ENV_INSTALL_ROOT) {
            self.install_root = Some(PathBuf::from(root));
        }
        self.validate()
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_range.contains(self.port) {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                value: format!("{} (inside session range {})", self.port, self.port_range),
            });
        }
        if self.max_allocation_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_allocation_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Idle timeout as a duration; `None` means wait forever.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid {field}: {value}")]
    InvalidValue { field: String, value: String },
}
