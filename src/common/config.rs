//! Configuration file handling

use serde::Deserialize;
use std::path::Path;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Session launch settings
    #[serde(default)]
    pub run: RunConfig,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Number of sessions launched by `wsbench run`
    #[serde(default = "default_sessions")]
    pub sessions: usize,

    /// Target used when a script does not name one
    #[serde(default)]
    pub target: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            sessions: default_sessions(),
            target: None,
        }
    }
}

fn default_sessions() -> usize {
    1
}

/// Session launch settings
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Delay between launching consecutive sessions
    #[serde(default = "default_arrival_interval")]
    pub arrival_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            arrival_interval_ms: default_arrival_interval(),
        }
    }
}

fn default_arrival_interval() -> u64 {
    0
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.defaults.sessions, 1);
        assert!(config.defaults.target.is_none());
        assert_eq!(config.run.arrival_interval_ms, 0);
    }

    #[test]
    fn test_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [defaults]
            sessions = 8
            target = "ws://127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.defaults.sessions, 8);
        assert_eq!(config.defaults.target.as_deref(), Some("ws://127.0.0.1:9000"));
        assert_eq!(config.run.arrival_interval_ms, 0);
    }

    #[test]
    fn test_invalid_file_is_config_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[defaults\nsessions = ").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(super::super::Error::ConfigParse(_))
        ));
    }
}
