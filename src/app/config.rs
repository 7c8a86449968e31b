//! Configuration for the session server

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logs::RotationPolicy;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Per-PTY output logs
    pub logs: LogConfig,
    /// PTY lifecycle settings
    pub session: SessionConfig,
    /// Subscriber fan-out settings
    pub stream: StreamConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 4096)),
        }
    }
}

/// Output log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory holding `<pty id>.log` files
    pub dir: PathBuf,
    /// Rotate once the active file reaches this many bytes
    pub max_bytes: u64,
    /// Number of rotated backups kept (`.1` is the newest)
    pub max_backups: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            max_bytes: 10 * 1024 * 1024,
            max_backups: 5,
        }
    }
}

impl LogConfig {
    pub fn rotation(&self) -> RotationPolicy {
        RotationPolicy {
            max_bytes: self.max_bytes,
            max_backups: self.max_backups,
        }
    }
}

/// PTY lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay between SIGHUP and SIGKILL when killing a PTY
    pub kill_grace_ms: u64,
    /// How long an exited PTY stays queryable before it is reaped
    pub exited_retention_secs: u64,
    /// How often the reaper runs
    pub reap_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kill_grace_ms: 2000,
            exited_retention_secs: 300,
            reap_interval_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn exited_retention(&self) -> Duration {
        Duration::from_secs(self.exited_retention_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// Stream fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Events buffered per PTY before a slow subscriber is disconnected
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from the default location or return the default config
    pub fn load_or_default() -> Self {
        // Try to load from ~/.config/termhub/config.json
        if let Some(config_path) = default_config_path() {
            if config_path.exists() {
                match Self::load(&config_path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(
                        path = %config_path.display(),
                        error = %e,
                        "ignoring unreadable config"
                    ),
                }
            }
        }
        Self::default()
    }
}

/// `~/.config/termhub/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("termhub").join("config.json"))
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("termhub")
        .join("logs")
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.addr.port(), 4096);
        assert_eq!(config.logs.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.logs.max_backups, 5);
        assert_eq!(config.session.kill_grace(), Duration::from_secs(2));
        assert_eq!(config.stream.channel_capacity, 1024);
    }

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server": {"addr": "0.0.0.0:9000"}, "logs": {"max_backups": 2}}"#)
                .unwrap();
        assert_eq!(config.server.addr.port(), 9000);
        assert_eq!(config.logs.max_backups, 2);
        assert_eq!(config.logs.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.session.exited_retention_secs, 300);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.stream.channel_capacity = 16;
        config.save(&path).unwrap();

        let restored = Config::load(&path).unwrap();
        assert_eq!(restored.stream.channel_capacity, 16);
    }

    #[test]
    fn test_config_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Json(_))));
    }
}
