use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PATH: &str = "settings.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    /// OAuth client secret downloaded from the provider console.
    pub credentials_path: PathBuf,
    /// Labels synced when neither the command line nor the stored state name any.
    pub default_labels: Vec<String>,
    /// Expected mail account. Used for commands that run without signing in.
    pub account: Option<String>,
    /// Recorded as the blocking actor.
    pub actor: Option<String>,
    pub debug_log: PathBuf,
    /// An in-progress flag older than this is treated as abandoned.
    pub stale_sync_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:taskdeck.db?mode=rwc".to_string(),
            credentials_path: PathBuf::from("credentials.json"),
            default_labels: vec![
                "INBOX".to_string(),
                "IMPORTANT".to_string(),
                "STARRED".to_string(),
            ],
            account: None,
            actor: None,
            debug_log: PathBuf::from("taskdeck_debug.log"),
            stale_sync_minutes: 30,
        }
    }
}

impl Config {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url is empty"));
        }
        if self.stale_sync_minutes <= 0 {
            return Err(ConfigError::Invalid("stale_sync_minutes must be positive"));
        }
        Ok(())
    }
}
