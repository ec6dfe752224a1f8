//! Panel configuration.
//!
//! Read from `~/.playground/panel.toml` unless a path is given. A missing file
//! means defaults; a file that exists but cannot be read or parsed is an error
//! so misconfiguration is not silently ignored.

use std::path::PathBuf;

use chrono::Duration;
use playground_protocol::MAX_MESSAGE_BYTES;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".playground/panel.toml";
const DEFAULT_STALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOMBSTONE_CAPACITY: usize = 256;
const DEFAULT_DISCARD_LOG_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PanelConfig {
    /// Seconds without a result before a run is reported as stalled.
    pub stall_timeout_secs: u64,
    pub max_message_bytes: usize,
    /// Cancelled/superseded runs remembered for classifying late results.
    pub tombstone_capacity: usize,
    pub discard_log_capacity: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: DEFAULT_STALL_TIMEOUT_SECS,
            max_message_bytes: MAX_MESSAGE_BYTES,
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
            discard_log_capacity: DEFAULT_DISCARD_LOG_CAPACITY,
        }
    }
}

impl PanelConfig {
    pub fn stall_timeout(&self) -> Duration {
        let secs = i64::try_from(self.stall_timeout_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        Duration::seconds(secs)
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<PanelConfig, ConfigError> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(PanelConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<PanelConfig>(&content).map_err(|err| ConfigError::Malformed {
        path: config_path,
        details: err.to_string(),
    })
}
