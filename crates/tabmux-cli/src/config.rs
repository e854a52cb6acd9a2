//! Client configuration at `~/.tabmux/config.toml`.
//!
//! Provides the server endpoint, auth token, recording and terminal
//! settings. CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub terminal: TerminalConfig,
}

/// Where shells come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint every sub-session dials.
    #[serde(default = "default_url")]
    pub url: String,

    /// Auth token sent in the init frame (empty = none).
    #[serde(default)]
    pub token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Start recording every tab as soon as it opens.
    #[serde(default)]
    pub auto_record: bool,

    /// Recordings root; defaults to `<data-dir>/tabmux/recordings`.
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Scrollback lines kept per sub-session.
    #[serde(default = "default_scrollback")]
    pub scrollback: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            scrollback: default_scrollback(),
        }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:7681/term".to_string()
}

fn default_scrollback() -> usize {
    tabmux_core::buffer::DEFAULT_SCROLLBACK
}

/// `~/.tabmux/config.toml`.
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".tabmux")
        .join("config.toml")
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Configured recordings root with a leading `~/` expanded.
    pub fn recordings_dir(&self) -> Option<PathBuf> {
        let dir = self.recording.directory.as_deref()?;
        match dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
            None => Some(PathBuf::from(dir)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.url, "ws://127.0.0.1:7681/term");
        assert!(cfg.server.token.is_empty());
        assert!(!cfg.recording.auto_record);
        assert_eq!(cfg.terminal.scrollback, 1000);
        assert!(cfg.recordings_dir().is_none());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
url = "wss://shell.example.com/term"
token = "s3cret"

[recording]
auto_record = true
directory = "/var/tmp/casts"

[terminal]
scrollback = 5000
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.url, "wss://shell.example.com/term");
        assert_eq!(cfg.server.token, "s3cret");
        assert!(cfg.recording.auto_record);
        assert_eq!(cfg.recordings_dir(), Some(PathBuf::from("/var/tmp/casts")));
        assert_eq!(cfg.terminal.scrollback, 5000);
    }

    #[test]
    fn parse_partial_toml_config() {
        let toml_str = r#"
[server]
token = "abc"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.token, "abc");
        assert_eq!(cfg.server.url, "ws://127.0.0.1:7681/term"); // default
        assert_eq!(cfg.terminal.scrollback, 1000); // default
    }

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.toml");
        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert!(cfg.server.token.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[server\nurl = 1").unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn home_relative_directory_expands() {
        let cfg: Config = toml::from_str("[recording]\ndirectory = \"~/casts\"\n").unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(cfg.recordings_dir(), Some(home.join("casts")));
        }
    }
}
