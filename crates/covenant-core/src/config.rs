use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::poller::PollConfig;
use crate::workflow::WorkflowConfig;

/// Environment variable overriding [`Settings::api_base_url`].
pub const API_URL_ENV: &str = "COVENANT_API_URL";
/// Environment variable overriding [`Settings::api_token`].
pub const API_TOKEN_ENV: &str = "COVENANT_API_TOKEN";

/// Application paths
#[derive(Debug, Clone)]
pub struct Config {
    /// Root config directory (~/.config/covenant)
    pub config_dir: PathBuf,
    /// User settings file
    pub settings_file: PathBuf,
}

impl Config {
    /// Load configuration or use defaults
    pub fn load_or_default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("covenant");
        Self::in_dir(config_dir)
    }

    /// Paths rooted at `config_dir`.
    pub fn in_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            settings_file: config_dir.join("settings.json"),
            config_dir,
        }
    }
}

/// User settings, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub poll_immediately: bool,
    pub auto_advance: bool,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            api_token: None,
            poll_interval_ms: 3000,
            max_attempts: 60,
            poll_immediately: true,
            auto_advance: true,
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from `path`.
    ///
    /// A missing file gives defaults; an unreadable or malformed one gives
    /// defaults with a warning.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read settings from {:?}: {}", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Invalid settings file {:?}, using defaults: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Apply `COVENANT_API_URL` and `COVENANT_API_TOKEN`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(API_URL_ENV).ok(),
            std::env::var(API_TOKEN_ENV).ok(),
        )
    }

    /// Replace the URL and token with any non-empty value given.
    pub fn with_overrides(mut self, api_url: Option<String>, api_token: Option<String>) -> Self {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(token) = api_token.filter(|t| !t.trim().is_empty()) {
            self.api_token = Some(token);
        }
        self
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts.max(1),
            immediate: self.poll_immediately,
        }
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            poll: self.poll_config(),
            auto_advance: self.auto_advance,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.poll_config(), PollConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::in_dir(dir.path().join("covenant"));

        let settings = Settings {
            api_base_url: "https://contracts.example.com/api".to_string(),
            api_token: Some("abc".to_string()),
            max_attempts: 5,
            ..Settings::default()
        };
        settings.save(&config.settings_file).unwrap();

        assert_eq!(Settings::load(&config.settings_file), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 500}"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.max_attempts, 60);
        assert!(settings.auto_advance);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_overrides_ignore_empty_values() {
        let settings = Settings::default().with_overrides(Some("".to_string()), Some("t".to_string()));
        assert_eq!(settings.api_base_url, "http://localhost:3000/api");
        assert_eq!(settings.api_token.as_deref(), Some("t"));

        let settings = settings.with_overrides(Some("http://other/api".to_string()), None);
        assert_eq!(settings.api_base_url, "http://other/api");
        assert_eq!(settings.api_token.as_deref(), Some("t"));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let settings = Settings {
            max_attempts: 0,
            auto_advance: false,
            ..Settings::default()
        };
        let workflow = settings.workflow_config();
        assert_eq!(workflow.poll.max_attempts, 1);
        assert!(!workflow.auto_advance);
    }
}
