//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for the journal
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Log output: "text" or "json"
    pub log_format: String,

    /// Per-sender lock wait (milliseconds)
    pub lock_timeout_ms: u64,

    /// Writer mailbox capacity (pending mutating commands)
    pub mailbox_capacity: usize,

    /// Journal configuration
    pub journal: JournalConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Snapshot configuration
    pub snapshot: SnapshotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_format: "text".to_string(),
            lock_timeout_ms: 100,
            mailbox_capacity: 1000,
            journal: JournalConfig::default(),
            rocksdb: RocksDBConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

/// Journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// fsync every append before acknowledging it
    ///
    /// Only for benchmarks: with `false` an acknowledged command is not on
    /// stable storage yet and `Storage::open` logs a warning.
    pub sync_writes: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { sync_writes: true }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshot every N applied commands (0 disables)
    pub interval_commands: u64,

    /// Snapshot after replaying a non-empty journal tail at startup
    pub on_open: bool,

    /// Snapshot on graceful shutdown
    pub on_shutdown: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_commands: 10_000,
            on_open: true,
            on_shutdown: true,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = parse_env("LEDGER_LOCK_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(interval) = std::env::var("LEDGER_SNAPSHOT_INTERVAL") {
            config.snapshot.interval_commands = parse_env("LEDGER_SNAPSHOT_INTERVAL", &interval)?;
        }

        if let Ok(format) = std::env::var("LEDGER_LOG_FORMAT") {
            config.log_format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(crate::Error::Config(format!(
                "unknown log_format {:?}",
                self.log_format
            )));
        }
        Ok(())
    }

    /// Per-sender lock wait
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("{} has invalid value {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "ledger-engine");
        assert_eq!(config.lock_timeout(), Duration::from_millis(100));
        assert!(config.journal.sync_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/ledger"
            lock_timeout_ms = 250

            [snapshot]
            interval_commands = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ledger"));
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.snapshot.interval_commands, 0);
        assert!(config.snapshot.on_shutdown);
        assert_eq!(config.mailbox_capacity, 1000);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "log_format = \"json\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log_format, "json");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.lock_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
