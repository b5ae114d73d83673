//! Server configuration: TOML settings file + CLI overrides.
//!
//! The settings file covers runtime knobs only; the port map itself lives in
//! the separate line-oriented map file (see `portgate_core::config`).

use portgate_core::{ForwardError, ForwardResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level settings file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub forwarder: ForwarderSection,
}

/// `[forwarder]` section of the settings TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderSection {
    #[serde(default = "default_map_file")]
    pub map_file: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ForwarderSection {
    fn default() -> Self {
        Self {
            map_file: default_map_file(),
            connect_timeout_ms: default_connect_timeout_ms(),
            buffer_size: default_buffer_size(),
            backlog: default_backlog(),
        }
    }
}

fn default_map_file() -> String {
    "./portmap".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_buffer_size() -> usize {
    1024
}
fn default_backlog() -> i32 {
    10000
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub map_path: PathBuf,
    pub connect_timeout: Duration,
    pub buffer_size: usize,
    pub backlog: i32,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_map: Option<&str>,
        cli_connect_timeout_ms: Option<u64>,
    ) -> ForwardResult<Self> {
        // Load base config from file
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| ForwardError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        // Merge CLI overrides
        let map_str = cli_map
            .map(|s| s.to_string())
            .unwrap_or(file_config.forwarder.map_file);
        let connect_timeout_ms =
            cli_connect_timeout_ms.unwrap_or(file_config.forwarder.connect_timeout_ms);

        Ok(Self {
            map_path: expand_tilde_str(&map_str),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            buffer_size: file_config.forwarder.buffer_size,
            backlog: file_config.forwarder.backlog,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = ServerConfig::load(None, None, None).unwrap();
        assert_eq!(config.map_path, PathBuf::from("./portmap"));
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.backlog, 10000);
    }

    #[test]
    fn test_parse_toml_section() {
        let parsed: ConfigFile = toml::from_str(
            "[forwarder]\nmap_file = \"/etc/portgate/map\"\nconnect_timeout_ms = 250\n",
        )
        .unwrap();
        assert_eq!(parsed.forwarder.map_file, "/etc/portgate/map");
        assert_eq!(parsed.forwarder.connect_timeout_ms, 250);
        // unspecified fields fall back to defaults
        assert_eq!(parsed.forwarder.buffer_size, 1024);
        assert_eq!(parsed.forwarder.backlog, 10000);
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = ServerConfig::load(None, Some("/tmp/other.map"), Some(100)).unwrap();
        assert_eq!(config.map_path, PathBuf::from("/tmp/other.map"));
        assert_eq!(config.connect_timeout, Duration::from_millis(100));
    }
}
