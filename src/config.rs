//! Configuration for the emberkv server.
//!
//! Configuration is loaded once at startup from an optional YAML file and
//! then passed by value into the store, WAL writer, and snapshot service.
//! There is no process-global config state; every component receives the
//! slice of configuration it needs at construction time.
//!
//! All fields are optional in the file. Missing fields take the defaults
//! listed on each field below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration: storage/durability settings plus the TCP
/// server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Store and persistence configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// TCP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        Self::from_yaml(&content)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(ConfigError::Parse)
    }
}

/// Storage and durability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Shards per CPU core; the shard count is fixed at startup as
    /// `available_parallelism * segments_per_cpu` (default: 4)
    #[serde(default = "default_segments_per_cpu")]
    pub segments_per_cpu: usize,

    /// Interval between expiry sweeps on each shard (default: 1s)
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Path of the active write-ahead log (default: wal.log)
    #[serde(default = "default_wal_file_path")]
    pub wal_file_path: PathBuf,

    /// Path of the snapshot file (default: snapshot.db)
    #[serde(default = "default_snapshot_file_path")]
    pub snapshot_file_path: PathBuf,

    /// Interval between WAL flush/fsync cycles (default: 1s)
    #[serde(default = "default_wal_flush_interval_seconds")]
    pub wal_flush_interval_seconds: u64,

    /// Interval between full-state snapshots (default: 300s)
    #[serde(default = "default_snapshot_interval_seconds")]
    pub snapshot_interval_seconds: u64,

    /// Active WAL size that triggers rotation (default: 100 MiB)
    #[serde(default = "default_wal_max_size_bytes")]
    pub wal_max_size_bytes: u64,

    /// Number of archived WAL files kept by retention (default: 5)
    #[serde(default = "default_wal_max_files")]
    pub wal_max_files: usize,

    /// Directory receiving archived WAL files; defaults to the parent
    /// directory of `wal_file_path`
    #[serde(default)]
    pub wal_directory: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            segments_per_cpu: default_segments_per_cpu(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            wal_file_path: default_wal_file_path(),
            snapshot_file_path: default_snapshot_file_path(),
            wal_flush_interval_seconds: default_wal_flush_interval_seconds(),
            snapshot_interval_seconds: default_snapshot_interval_seconds(),
            wal_max_size_bytes: default_wal_max_size_bytes(),
            wal_max_files: default_wal_max_files(),
            wal_directory: None,
        }
    }
}

impl StoreConfig {
    /// Expiry sweep interval as a `Duration`.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }

    /// WAL flush interval as a `Duration`.
    pub fn wal_flush_interval(&self) -> Duration {
        Duration::from_secs(self.wal_flush_interval_seconds.max(1))
    }

    /// Snapshot interval as a `Duration`.
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_seconds.max(1))
    }

    /// Directory that receives archived WAL files. Falls back to the
    /// parent directory of the active WAL path.
    pub fn wal_directory(&self) -> PathBuf {
        match &self.wal_directory {
            Some(dir) => dir.clone(),
            None => {
                let parent = self.wal_file_path.parent().unwrap_or_else(|| Path::new(""));
                if parent.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    parent.to_path_buf()
                }
            }
        }
    }
}

/// TCP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (default: 6379)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level: trace, debug, info, warn, error (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_segments_per_cpu() -> usize {
    4
}

fn default_cleanup_interval_seconds() -> u64 {
    1
}

fn default_wal_file_path() -> PathBuf {
    PathBuf::from("wal.log")
}

fn default_snapshot_file_path() -> PathBuf {
    PathBuf::from("snapshot.db")
}

fn default_wal_flush_interval_seconds() -> u64 {
    1
}

fn default_snapshot_interval_seconds() -> u64 {
    300
}

fn default_wal_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_wal_max_files() -> usize {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    crate::DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_yaml::Error),
}
