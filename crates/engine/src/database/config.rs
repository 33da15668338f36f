//! Database configuration via `cellar.toml`
//!
//! On first open of a data directory a default `cellar.toml` is created.
//! To change settings, edit the file and reopen the database.

use std::path::Path;
use std::time::Duration;

use cellar_concurrency::CoalescerConfig;
use cellar_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "cellar.toml";

/// Database configuration loaded from `cellar.toml`.
///
/// Every field is optional in the file; missing fields take their defaults.
///
/// # Example
///
/// ```toml
/// max_batch_operations = 1000
/// batch_wait_ms = 2
/// query_timeout_ms = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellarConfig {
    /// Operation count that closes a write batch.
    pub max_batch_operations: usize,
    /// Payload bytes that close a write batch.
    pub max_batch_bytes: usize,
    /// Longest a write batch stays open, in milliseconds.
    pub batch_wait_ms: u64,
    /// Transactions that may queue for the writer before submitters wait.
    pub write_queue_depth: usize,
    /// Deadline for a put or delete, in milliseconds.
    pub write_timeout_ms: u64,
    /// Default deadline for a query, in milliseconds.
    pub query_timeout_ms: u64,
    /// Most ids a single index scan returns.
    pub query_limit: usize,
    /// Result limit applied when a query sets none.
    pub default_query_limit: usize,
    /// Longest the TTL sweeper sleeps between passes, in milliseconds.
    pub ttl_max_interval_ms: u64,
    /// Chunk size for stored files, in bytes.
    pub file_chunk_size: usize,
}

impl Default for CellarConfig {
    fn default() -> Self {
        Self {
            max_batch_operations: 1000,
            max_batch_bytes: 4 * 1024 * 1024,
            batch_wait_ms: 2,
            write_queue_depth: 1024,
            write_timeout_ms: 10_000,
            query_timeout_ms: 10_000,
            query_limit: 10_000,
            default_query_limit: 100,
            ttl_max_interval_ms: 60_000,
            file_chunk_size: 512 * 1024,
        }
    }
}

impl CellarConfig {
    /// Reject settings the database cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 9] = [
            ("max_batch_operations", self.max_batch_operations > 0),
            ("max_batch_bytes", self.max_batch_bytes > 0),
            ("write_queue_depth", self.write_queue_depth > 0),
            ("write_timeout_ms", self.write_timeout_ms > 0),
            ("query_timeout_ms", self.query_timeout_ms > 0),
            ("query_limit", self.query_limit > 0),
            ("default_query_limit", self.default_query_limit > 0),
            ("ttl_max_interval_ms", self.ttl_max_interval_ms > 0),
            ("file_chunk_size", self.file_chunk_size > 0),
        ];
        for (field, ok) in checks {
            if !ok {
                return Err(Error::invalid_input(format!(
                    "'{}' in {} must be greater than zero",
                    field, CONFIG_FILE_NAME
                )));
            }
        }
        Ok(())
    }

    /// Batching limits for the writer task.
    pub fn coalescer(&self) -> CoalescerConfig {
        CoalescerConfig {
            max_operations: self.max_batch_operations,
            max_batch_bytes: self.max_batch_bytes,
            max_wait: Duration::from_millis(self.batch_wait_ms),
            queue_depth: self.write_queue_depth,
        }
    }

    /// Deadline for writes.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Default deadline for queries.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Longest sleep of the TTL sweeper.
    pub fn ttl_max_interval(&self) -> Duration {
        Duration::from_millis(self.ttl_max_interval_ms)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Cellar database configuration

# Write batching: a batch is committed once it holds this many operations,
# this many payload bytes, or has been open for batch_wait_ms.
max_batch_operations = 1000
max_batch_bytes = 4194304
batch_wait_ms = 2

# Transactions that may queue for the writer before submitters wait.
write_queue_depth = 1024

# Deadlines in milliseconds.
write_timeout_ms = 10000
query_timeout_ms = 10000

# Most ids one index scan may return, and the result limit used when a
# query sets none.
query_limit = 10000
default_query_limit = 100

# Longest the TTL sweeper sleeps between passes, in milliseconds.
ttl_max_interval_ms = 60000

# Chunk size for stored files, in bytes.
file_chunk_size = 524288
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: CellarConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Io(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Io(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default() {
        let parsed: CellarConfig = toml::from_str(CellarConfig::default_toml()).unwrap();
        assert_eq!(parsed, CellarConfig::default());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        CellarConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(CellarConfig::from_file(&path).unwrap(), CellarConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "batch_wait_ms = 25\n").unwrap();

        CellarConfig::write_default_if_missing(&path).unwrap();

        let config = CellarConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_wait_ms, 25);
        assert_eq!(config.query_limit, 10_000);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();
        assert_eq!(CellarConfig::from_file(&path).unwrap(), CellarConfig::default());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = CellarConfig {
            max_batch_operations: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_batch_operations"));

        let config = CellarConfig {
            ttl_max_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "query_limit = \"lots\"\n").unwrap();
        assert!(matches!(
            CellarConfig::from_file(&path),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = CellarConfig {
            batch_wait_ms: 7,
            file_chunk_size: 4096,
            ..Default::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(CellarConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn coalescer_config_mirrors_fields() {
        let config = CellarConfig::default();
        let coalescer = config.coalescer();
        assert_eq!(coalescer.max_operations, 1000);
        assert_eq!(coalescer.max_wait, Duration::from_millis(2));
        assert_eq!(coalescer.queue_depth, 1024);
    }
}
