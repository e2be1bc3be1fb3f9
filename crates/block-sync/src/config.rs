//! Editor configuration loading.

use crate::drag::DragThresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the debounce delay in milliseconds.
pub const DEBOUNCE_ENV: &str = "NOTES_DEBOUNCE_MS";

/// Editor configuration, usually read from `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Per-block debounce delay before a patch is flushed (default: 400ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Drag-and-drop offsets
    #[serde(default)]
    pub drag: DragThresholds,
}

fn default_debounce_ms() -> u64 {
    400
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            drag: DragThresholds::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{name} must be a whole number of milliseconds, got {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

impl EditorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Load from a JSON file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EditorConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `NOTES_DEBOUNCE_MS` if it is set.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(std::env::var(DEBOUNCE_ENV).ok())
    }

    fn with_overrides(mut self, debounce: Option<String>) -> Result<Self> {
        if let Some(value) = debounce {
            self.debounce_ms = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: DEBOUNCE_ENV,
                    value,
                })?;
            tracing::debug!("Debounce overridden to {}ms", self.debounce_ms);
        }
        Ok(self)
    }
}
