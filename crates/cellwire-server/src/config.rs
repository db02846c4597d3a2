//! Server configuration loaded from TOML.
//!
//! Every section is optional; missing keys take their defaults. A missing
//! file is the same as an empty one.
//!
//! ```toml
//! listen = "127.0.0.1:8100"
//! state_file = "/var/lib/cellwire/state.json"
//!
//! [poller]
//! fast_interval_us = 16667
//! slow_interval_ms = 500
//!
//! [autosave]
//! debounce_ms = 500
//!
//! [stream]
//! cadence = "fast"
//! write_timeout_ms = 10000
//! ```

use std::fs;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cellwire_core::PollerConfig;
use cellwire_persistence::AutoSaveConfig;
use cellwire_stream::StreamConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const APP_QUALIFIER: &str = "org";
const APP_ORG: &str = "cellwire";
const APP_NAME: &str = "cellwire-server";
const CONFIG_FILENAME: &str = "config.toml";
const STATE_FILENAME: &str = "state.json";

pub const DEFAULT_PORT: u16 = 8100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Defaults to the platform data directory.
    pub state_file: Option<PathBuf>,
    /// Fixed capability token; a random one is issued when absent.
    pub capability: Option<String>,
    pub poller: PollerSettings,
    pub autosave: AutoSaveConfig,
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            state_file: None,
            capability: None,
            poller: PollerSettings::default(),
            autosave: AutoSaveConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Poller tick periods as they appear in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub fast_interval_us: u64,
    pub slow_interval_ms: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        let defaults = PollerConfig::default();
        Self {
            fast_interval_us: u64::try_from(defaults.fast_interval.as_micros()).unwrap_or(16_667),
            slow_interval_ms: u64::try_from(defaults.slow_interval.as_millis()).unwrap_or(500),
        }
    }
}

impl PollerSettings {
    pub fn to_poller_config(self) -> PollerConfig {
        PollerConfig {
            fast_interval: Duration::from_micros(self.fast_interval_us),
            slow_interval: Duration::from_millis(self.slow_interval_ms),
        }
    }
}

/// Default location of the config file.
///
/// Returns `None` if the platform-specific directory cannot be determined.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
}

fn default_state_path() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.data_dir().join(STATE_FILENAME))
}

impl ServerConfig {
    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        match fs::read_to_string(&path) {
            Ok(content) => {
                let config = Self::from_toml(&content, &path)?;
                info!(path = %path.display(), "loaded configuration");
                Ok(config)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.fast_interval_us == 0 || self.poller.slow_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "poller intervals must be greater than zero".to_string(),
            });
        }
        if self.stream.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "stream.write_timeout_ms must be greater than zero".to_string(),
            });
        }
        if let Some(token) = &self.capability
            && (token.is_empty() || token.contains('/'))
        {
            return Err(ConfigError::Invalid {
                message: format!("capability token {token:?} must be non-empty and contain no '/'"),
            });
        }
        Ok(())
    }

    /// Where the state snapshot lives.
    pub fn state_path(&self) -> Result<PathBuf, ConfigError> {
        self.state_file
            .clone()
            .or_else(default_state_path)
            .ok_or_else(|| ConfigError::Invalid {
                message: "no state_file configured and no platform data directory".to_string(),
            })
    }
}
