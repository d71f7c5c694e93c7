//! Configuration for the redrock node
//!
//! Supports YAML configuration files with module-based organization

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Dump configuration
    pub dump: DumpConfig,
    /// Logging configuration
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            dump: DumpConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.server.merge(other.server);
        self.storage.merge(other.storage);
        self.dump.merge(other.dump);
        self.log.merge(other.log);
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Rsync listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Worker pool size
    #[serde(default = "default_thread_num")]
    pub thread_num: usize,
    /// Per-connection idle timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Accept cap
    #[serde(default = "default_maxconnection")]
    pub maxconnection: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            thread_num: default_thread_num(),
            timeout_secs: default_timeout_secs(),
            maxconnection: default_maxconnection(),
        }
    }
}

impl ServerConfig {
    fn merge(&mut self, other: Self) {
        if other.port > 0 {
            self.port = other.port;
        }
        if other.thread_num > 0 {
            self.thread_num = other.thread_num;
        }
        if other.timeout_secs > 0 {
            self.timeout_secs = other.timeout_secs;
        }
        if other.maxconnection > 0 {
            self.maxconnection = other.maxconnection;
        }
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the engine data
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Per-family memtable budget in bytes
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    /// Database name
    #[serde(default = "default_db_name")]
    pub db_name: String,
    /// Number of slots
    #[serde(default = "default_slot_num")]
    pub slot_num: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            write_buffer_size: default_write_buffer_size(),
            db_name: default_db_name(),
            slot_num: default_slot_num(),
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, other: Self) {
        if !other.db_path.as_os_str().is_empty() {
            self.db_path = other.db_path;
        }
        if other.write_buffer_size > 0 {
            self.write_buffer_size = other.write_buffer_size;
        }
        if !other.db_name.is_empty() {
            self.db_name = other.db_name;
        }
        if other.slot_num > 0 {
            self.slot_num = other.slot_num;
        }
    }
}

/// Dump configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Snapshot directory location
    #[serde(default = "default_dump_path")]
    pub dump_path: PathBuf,
    /// Prefix for per-database dump directories
    #[serde(default)]
    pub dump_prefix: String,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            dump_path: default_dump_path(),
            dump_prefix: String::new(),
        }
    }
}

impl DumpConfig {
    fn merge(&mut self, other: Self) {
        if !other.dump_path.as_os_str().is_empty() {
            self.dump_path = other.dump_path;
        }
        if !other.dump_prefix.is_empty() {
            self.dump_prefix = other.dump_prefix;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_port() -> u16 {
    9221
}

fn default_thread_num() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_maxconnection() -> usize {
    20_000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./db")
}

fn default_write_buffer_size() -> usize {
    256 * 1024 * 1024 // 256MB
}

fn default_db_name() -> String {
    "db0".to_string()
}

fn default_slot_num() -> u32 {
    1
}

fn default_dump_path() -> PathBuf {
    PathBuf::from("./dump")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Process-wide configuration handle with single-writer, many-reader
/// semantics
#[derive(Clone)]
pub struct SharedConfig(Arc<RwLock<Config>>);

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Config> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Config> {
        self.0.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 9221);
        assert_eq!(config.server.thread_num, 2);
        assert_eq!(config.server.timeout_secs, 60);
        assert_eq!(config.server.maxconnection, 20_000);
        assert_eq!(config.storage.db_name, "db0");
        assert_eq!(config.storage.slot_num, 1);
        assert_eq!(config.dump.dump_prefix, "");
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  port: 9301
  thread_num: 4
storage:
  db_path: /data/redrock
  db_name: db1
  slot_num: 8
dump:
  dump_path: /data/dump
  dump_prefix: backup-
log:
  level: debug
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9301);
        assert_eq!(config.server.thread_num, 4);
        // omitted keys fall back to defaults
        assert_eq!(config.server.timeout_secs, 60);
        assert_eq!(config.storage.db_path, PathBuf::from("/data/redrock"));
        assert_eq!(config.storage.slot_num, 8);
        assert_eq!(config.dump.dump_prefix, "backup-");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_merge_precedence() {
        let mut base = Config::default();
        let mut overlay = Config::default();
        overlay.server.port = 9400;
        overlay.storage.db_name = "db9".to_string();
        overlay.log.level = "warn".to_string();

        base.merge(overlay);
        assert_eq!(base.server.port, 9400);
        assert_eq!(base.storage.db_name, "db9");
        assert_eq!(base.log.level, "warn");
        // untouched sections keep their values
        assert_eq!(base.server.thread_num, 2);
    }

    #[test]
    fn test_shared_config_read_write() {
        let shared = SharedConfig::new(Config::default());
        assert_eq!(shared.read().server.port, 9221);
        shared.write().server.port = 9999;
        assert_eq!(shared.read().server.port, 9999);
    }
}
