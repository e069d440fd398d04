//! # Configuration Management Module
//!
//! Persistent settings for device discovery, stored in a platform-appropriate
//! location.
//!
//! ## Settings
//! - `scan_timeout_secs`: How long to scan for a Heart Rate Service device
//! - `device_name`: Optional case-insensitive substring the device name must contain
//! - `adapter_index`: Which Bluetooth adapter to use when several are present
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/hrm-notify/config.toml
//! - Linux: ~/.config/hrm-notify/config.toml
//! - Windows: %APPDATA%\hrm-notify\config.toml

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan_timeout_secs: u64,
    pub device_name: Option<String>,
    pub adapter_index: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 5,
            device_name: None,
            adapter_index: 0,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hrm-notify")
            .join("config.toml")
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// Whether an advertised name passes the `device_name` filter
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        match (&self.device_name, name) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(filter), Some(name)) => name.to_lowercase().contains(&filter.to_lowercase()),
        }
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, create default
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scan_timeout_secs, 5);
        assert_eq!(config.device_name, None);
        assert_eq!(config.adapter_index, 0);
        assert_eq!(config.scan_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config {
            scan_timeout_secs: 10,
            device_name: Some("Polar".to_string()),
            adapter_index: 1,
        };

        let toml_str = toml::to_string(&config).expect("Failed to serialize");
        assert!(toml_str.contains("scan_timeout_secs = 10"));
        assert!(toml_str.contains("device_name = \"Polar\""));
        assert!(toml_str.contains("adapter_index = 1"));
    }

    #[test]
    fn test_config_deserialization_fills_defaults() {
        let toml_str = r#"
            device_name = "H10"
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.device_name.as_deref(), Some("H10"));
        assert_eq!(config.scan_timeout_secs, 5);
        assert_eq!(config.adapter_index, 0);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            scan_timeout_secs: 2,
            device_name: Some("Wahoo".to_string()),
            adapter_index: 0,
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "scan_timeout_secs = \"soon\"").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_name_filter() {
        let mut config = Config::default();
        assert!(config.matches_name(None));
        assert!(config.matches_name(Some("anything")));

        config.device_name = Some("polar".to_string());
        assert!(config.matches_name(Some("Polar H10 1A2B3C4D")));
        assert!(!config.matches_name(Some("Wahoo TICKR")));
        assert!(!config.matches_name(None));
    }
}
