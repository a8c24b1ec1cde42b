//! Configuration for ebonterm.
//!
//! Loaded from `~/.ebonterm/config.toml`; every key is optional and a missing
//! or malformed file falls back to the defaults:
//!
//! ```toml
//! host = "nethack.alt.org"
//! port = 23
//!
//! # honour the server's tile hints (CSI ... z)
//! server_tiles = true
//!
//! # send 8/2/4/6 instead of k/j/h/l for the arrow keys
//! number_pad = false
//!
//! # outbound queue flush cadence
//! send_interval_ms = 50
//! connect_timeout_secs = 10
//!
//! debug = false
//!
//! [terminal]
//! width = 80
//! height = 24
//! display_location = "ebonterm:0.0"
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::telnet::SessionConfig;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Game server host name
    pub host: String,
    pub port: u16,
    /// Use the server's tile hints
    pub server_tiles: bool,
    /// Map movement keys onto the number pad digits
    pub number_pad: bool,
    pub send_interval_ms: u64,
    pub connect_timeout_secs: u64,
    /// Verbose logging
    pub debug: bool,
    pub terminal: TerminalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "nethack.alt.org".to_string(),
            port: 23,
            server_tiles: true,
            number_pad: false,
            send_interval_ms: 50,
            connect_timeout_secs: 10,
            debug: false,
            terminal: TerminalConfig::default(),
        }
    }
}

/// Terminal geometry and identity reported to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub width: u16,
    pub height: u16,
    pub display_location: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            display_location: "ebonterm:0.0".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    return Self::from_toml(&content);
                }
            }
        }
        Self::default()
    }

    /// Parse a configuration, falling back to defaults when it is malformed
    pub fn from_toml(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring malformed config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf, String> {
        let path = Self::get_config_path().ok_or_else(|| "Could not determine config path".to_string())?;
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(path)
    }

    /// Directory holding the config file and the log
    pub fn data_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(".ebonterm");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    fn get_config_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Settings for a new telnet session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            width: self.terminal.width,
            height: self.terminal.height,
            server_tiles: self.server_tiles,
            display_location: self.terminal.display_location.clone(),
        }
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_toml(
            r#"
            host = "localhost"
            number_pad = true

            [terminal]
            height = 30
            "#,
        );
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 23);
        assert!(config.number_pad);
        assert!(config.server_tiles);
        assert_eq!(config.terminal.width, 80);
        assert_eq!(config.terminal.height, 30);
        assert_eq!(config.terminal.display_location, "ebonterm:0.0");
    }

    #[test]
    fn test_malformed_file_falls_back() {
        assert_eq!(Config::from_toml("port = \"twenty-three\""), Config::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.server_tiles = false;
        config.terminal.display_location = "box:0.0".to_string();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::from_toml(&text), config);
    }

    #[test]
    fn test_session_config() {
        let mut config = Config::default();
        config.terminal.width = 132;
        config.server_tiles = false;
        let session = config.session_config();
        assert_eq!(session.width, 132);
        assert_eq!(session.height, 24);
        assert!(!session.server_tiles);
        assert_eq!(session.display_location, "ebonterm:0.0");
    }
}
