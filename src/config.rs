//! Configuration for conclient.
//!
//! The configuration file is located at `~/.conclient/config.toml`:
//!
//! ```toml
//! # Hosting peer started when a new console is allocated
//! host_command = "wineconsole"
//!
//! # Directory holding conhost.exe for pseudo consoles
//! system_dir = 'C:\windows\system32'
//!
//! [codepage]
//! oem = 437
//! ansi = 1252
//!
//! [log]
//! level = "info"
//! file = "/tmp/conclient.log"
//!
//! [demo]
//! width = 80
//! height = 25
//! ```
//!
//! A missing or unreadable file yields the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::codepage::{CP_OEM_US, CP_WINDOWS_1252};
use crate::core::session::ConsoleSettings;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hosting peer for newly allocated consoles
    pub host_command: String,
    /// Directory of `conhost.exe`
    pub system_dir: String,
    pub codepage: CodepageConfig,
    pub log: LogConfig,
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        let settings = ConsoleSettings::default();
        Self {
            host_command: settings.host_command,
            system_dir: settings.system_dir,
            codepage: CodepageConfig::default(),
            log: LogConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

/// Fallback codepages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodepageConfig {
    pub oem: u32,
    pub ansi: u32,
}

impl Default for CodepageConfig {
    fn default() -> Self {
        Self {
            oem: CP_OEM_US,
            ansi: CP_WINDOWS_1252,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Log to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Session size used by the demo binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub width: u16,
    pub height: u16,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { width: 80, height: 25 }
    }
}

impl DemoConfig {
    fn validate(&self) -> Result<(), String> {
        let max = i16::MAX as u16;
        if self.width == 0 || self.height == 0 || self.width > max || self.height > max {
            return Err(format!("demo size {}x{} out of range", self.width, self.height));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(config) = Self::from_toml_str(&content) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Parse a configuration; a demo size that is zero or does not fit a
    /// screen coordinate is an error
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let config: Self = toml::from_str(content)?;
        config.demo.validate().map_err(<toml::de::Error as serde::de::Error>::custom)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), String> {
        if let Some(path) = Self::get_config_path() {
            let content = toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))?;
            fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
            Ok(())
        } else {
            Err("Could not determine config path".to_string())
        }
    }

    /// Get config file path
    pub fn get_config_path() -> Option<PathBuf> {
        if let Some(home) = home_dir() {
            let dir = home.join(".conclient");
            if !dir.exists() {
                let _ = fs::create_dir_all(&dir);
            }
            return Some(dir.join("config.toml"));
        }
        None
    }
}

impl From<&Config> for ConsoleSettings {
    fn from(config: &Config) -> Self {
        Self {
            host_command: config.host_command.clone(),
            system_dir: config.system_dir.clone(),
            oem_cp: config.codepage.oem,
            ansi_cp: config.codepage.ansi,
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            host_command = "conhost-peer"

            [codepage]
            oem = 850

            [log]
            file = "/tmp/conclient.log"
            "#,
        )
        .unwrap();
        assert_eq!(config.host_command, "conhost-peer");
        assert_eq!(config.system_dir, r"C:\windows\system32");
        assert_eq!(config.codepage.oem, 850);
        assert_eq!(config.codepage.ansi, CP_WINDOWS_1252);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.file, Some(PathBuf::from("/tmp/conclient.log")));
        assert_eq!(config.demo, DemoConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("host_command = [").is_err());
        assert!(Config::from_toml_str("[demo]\nwidth = -1").is_err());
    }

    #[test]
    fn test_demo_size_must_fit_a_coordinate() {
        assert!(Config::from_toml_str("[demo]\nwidth = 0").is_err());
        assert!(Config::from_toml_str("[demo]\nheight = 0").is_err());
        assert!(Config::from_toml_str("[demo]\nwidth = 40000").is_err());
        let config = Config::from_toml_str("[demo]\nwidth = 32767\nheight = 1").unwrap();
        assert_eq!((config.demo.width, config.demo.height), (32767, 1));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/conclient/config.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.codepage.oem = 850;
        let settings = ConsoleSettings::from(&config);
        assert_eq!(settings.host_command, "wineconsole");
        assert_eq!(settings.oem_cp, 850);
        assert_eq!(settings.ansi_cp, CP_WINDOWS_1252);
    }

    #[test]
    fn test_serialized_form_parses_back() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
