//! Settings file for edgedock.
//!
//! A missing file yields defaults. A present-but-broken file is an error so
//! callers can decide whether to fall back (startup) or keep what they have
//! (reload).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DockError, Result};
use crate::position::DockPosition;

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".edgedock/edgedock.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl SessionSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocksSettings {
    #[serde(default = "default_positions")]
    pub positions: Vec<DockPosition>,
}

impl Default for DocksSettings {
    fn default() -> Self {
        Self {
            positions: default_positions(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExitBehavior {
    /// Dispose every session and stop the process.
    #[default]
    Shutdown,
    /// Hide every dock but keep serving requests.
    Hide,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DaemonSettings {
    #[serde(default)]
    pub exit_behavior: ExitBehavior,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DockConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub docks: DocksSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
}

impl DockConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session.debounce_ms == 0 {
            return Err(DockError::ConfigInvalid(
                "session.debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.docks.positions.is_empty() {
            return Err(DockError::ConfigInvalid(
                "docks.positions must name at least one edge".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for position in &self.docks.positions {
            if !seen.insert(*position) {
                return Err(DockError::ConfigInvalid(format!(
                    "docks.positions lists {} more than once",
                    position
                )));
            }
        }
        Ok(())
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_positions() -> Vec<DockPosition> {
    vec![DockPosition::Bottom]
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(DockError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<DockConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DockConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| DockError::ConfigRead {
        path: config_path.clone(),
        source,
    })?;
    parse_config(&config_path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<DockConfig> {
    let config =
        toml::from_str::<DockConfig>(content).map_err(|err| DockError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}
