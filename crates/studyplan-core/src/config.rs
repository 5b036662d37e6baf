//! Application configuration management.
//!
//! This module handles loading and saving the configuration: backend
//! location and key, sync retry and staleness policy, navigation snapshot
//! policy, and the remembered user.
//!
//! Configuration is stored at `~/.config/studyplan/config.json`.
//! `STUDYPLAN_BACKEND_URL` and `STUDYPLAN_ANON_KEY` override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "studyplan";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_BACKEND_URL: &str = "STUDYPLAN_BACKEND_URL";
const ENV_ANON_KEY: &str = "STUDYPLAN_ANON_KEY";

/// Default number of failed submissions before a pending change is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Settings older than an hour are refreshed in the background.
pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 60;

/// Navigation snapshots older than a week are not restored.
pub const DEFAULT_NAVIGATION_MAX_AGE_DAYS: i64 = 7;

const DEFAULT_NAVIGATION_NAMESPACE: &str = "root";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    /// Overrides the platform cache directory
    pub cache_dir: Option<PathBuf>,
    pub last_user_id: Option<String>,
    pub sync: SyncConfig,
    pub navigation: NavigationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub stale_after_minutes: i64,
    /// Kick off a background sync after every local write
    pub auto_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            stale_after_minutes: DEFAULT_STALE_AFTER_MINUTES,
            auto_sync: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub namespace: String,
    pub max_age_days: i64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAVIGATION_NAMESPACE.to_string(),
            max_age_days: DEFAULT_NAVIGATION_MAX_AGE_DAYS,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(
            std::env::var(ENV_BACKEND_URL).ok(),
            std::env::var(ENV_ANON_KEY).ok(),
        );
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Non-empty override values replace what the file says.
    pub fn apply_overrides(&mut self, backend_url: Option<String>, anon_key: Option<String>) {
        if let Some(url) = backend_url.filter(|v| !v.trim().is_empty()) {
            self.backend_url = Some(url);
        }
        if let Some(key) = anon_key.filter(|v| !v.trim().is_empty()) {
            self.anon_key = Some(key);
        }
    }

    /// Both a backend URL and an API key are set.
    pub fn has_backend(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.backend_url) && set(&self.anon_key)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.stale_after_minutes, 60);
        assert!(config.sync.auto_sync);
        assert_eq!(config.navigation.max_age_days, 7);
        assert_eq!(config.navigation.namespace, "root");
        assert!(!config.has_backend());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.backend_url.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sync": {"max_retries": 5}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.stale_after_minutes, 60);
        assert_eq!(config.navigation.max_age_days, 7);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.last_user_id = Some("u1".to_string());
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.last_user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_overrides_ignore_blank_values() {
        let mut config = Config {
            backend_url: Some("https://file.example".to_string()),
            ..Config::default()
        };
        config.apply_overrides(Some("  ".to_string()), Some("anon".to_string()));
        assert_eq!(config.backend_url.as_deref(), Some("https://file.example"));
        assert_eq!(config.anon_key.as_deref(), Some("anon"));
        assert!(config.has_backend());
    }

    #[test]
    fn test_cache_dir_override() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/studyplan-test")),
            ..Config::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/studyplan-test"));
    }
}
