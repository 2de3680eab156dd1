use crate::error::ConfigError;
use crate::providers::CallOptions;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Crate configuration, loaded from `config.toml`. Every field has a
/// default so an absent file means defaults throughout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Override for the data directory; platform default when unset.
    pub data_dir: Option<PathBuf>,
    pub api_base_url: String,
    pub request_timeout_secs: u64,

    pub models: ModelConfig,
}

/// Model ids for each studio tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub chat: String,
    pub image: String,
    pub speech: String,
    pub analysis: String,
    pub points_of_interest: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            chat: "gemini-2.5-flash".into(),
            image: "gemini-2.5-flash-image".into(),
            speech: "gemini-2.5-flash-preview-tts".into(),
            analysis: "gemini-2.5-pro".into(),
            points_of_interest: "gemini-2.5-flash".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            api_base_url: DEFAULT_API_BASE_URL.into(),
            request_timeout_secs: 120,
            models: ModelConfig::default(),
        }
    }
}

impl Config {
    /// Parse a config file; an absent file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|error| ConfigError::Load(error.to_string()))
    }

    /// Platform data directory, honoring the `data_dir` override.
    pub fn resolved_data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        ProjectDirs::from("", "", "atelier")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Load("cannot resolve a home directory".into()))
    }

    pub fn conversations_db_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.resolved_data_dir()?.join("conversations.db"))
    }

    /// Flat history file written by pre-store builds; input to the one-time
    /// migration.
    pub fn legacy_history_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.resolved_data_dir()?.join("history.json"))
    }

    /// Per-call options carrying the configured request timeout, for
    /// constructing managers.
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.request_timeout_secs, 120);
        assert_eq!(config.models.chat, "gemini-2.5-flash");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_base_url = \"http://localhost:9090\"\n\n[models]\nchat = \"local-chat\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:9090");
        assert_eq!(config.models.chat, "local-chat");
        assert_eq!(config.models.image, "gemini-2.5-flash-image");
    }

    #[test]
    fn invalid_toml_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_base_url = [broken").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn call_options_carry_the_configured_timeout() {
        let config = Config {
            request_timeout_secs: 30,
            ..Config::default()
        };
        assert_eq!(config.call_options().timeout, Duration::from_secs(30));
    }

    #[test]
    fn data_dir_override_wins() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/atelier-test")),
            ..Config::default()
        };
        assert_eq!(
            config.conversations_db_path().unwrap(),
            PathBuf::from("/tmp/atelier-test/conversations.db")
        );
    }
}
