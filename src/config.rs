//! Runtime configuration, read from `quest-engine.toml`

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "quest-engine.toml";
pub const CONFIG_PATH_ENV: &str = "QUEST_ENGINE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the content tree; quests live under `data_dir/quests`
    pub data_dir: PathBuf,
    pub database_url: String,
    /// Which save's progress to load
    pub save_id: String,
    /// Used when RUST_LOG is not set
    pub log_filter: String,
    pub starting_xp: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_url: "sqlite:quests.db?mode=rwc".to_string(),
            save_id: "default".to_string(),
            log_filter: "quest_engine=info".to_string(),
            starting_xp: 0,
        }
    }
}

impl Config {
    /// Load from `QUEST_ENGINE_CONFIG`, falling back to `quest-engine.toml`
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    /// A missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {:?}; using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quest-engine.toml");
        std::fs::write(&path, "save_id = \"slot2\"\nstarting_xp = 500\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.save_id, "slot2");
        assert_eq!(config.starting_xp, 500);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.database_url, "sqlite:quests.db?mode=rwc");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quest-engine.toml");
        std::fs::write(&path, "starting_xp = \"lots\"").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
