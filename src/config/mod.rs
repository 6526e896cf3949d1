//! Runtime configuration, loaded from JSON.
//!
//! Every field has a default, so an empty object (or no file at all) yields a
//! working configuration:
//!
//! ```json
//! {
//!   "cache":      { "enabled": true, "sweep_interval_ticks": 600, "trim_fraction": 0.2 },
//!   "extensions": { "route_prefix": "/api/v1" },
//!   "server":     { "bind_addr": "127.0.0.1:8765" }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub extensions: ExtensionConfig,
    pub server: ServerConfig,
}

impl RuntimeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Host ticks between expiration sweeps.
    pub sweep_interval_ticks: u64,
    /// Share of entries an unfiltered trim evicts, oldest access first.
    /// Clamped to `0.0..=1.0` when used.
    pub trim_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_ticks: 600,
            trim_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Prepended to every extension namespace, e.g. `/api/v1`.
    pub route_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_owned(),
        }
    }
}
