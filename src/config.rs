//! Configuration module for Cumulus.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{CumulusError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/cumulus.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Object backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectsConfig {
    /// Root directory of the filesystem object backend.
    #[serde(default = "default_objects_root")]
    pub root: String,
}

fn default_objects_root() -> String {
    "data/objects".to_string()
}

impl Default for ObjectsConfig {
    fn default() -> Self {
        Self {
            root: default_objects_root(),
        }
    }
}

/// Upload pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory where inbound uploads are staged before hand-off.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    /// Number of chunk writer tasks per upload.
    #[serde(default = "default_upload_workers")]
    pub workers: usize,
    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Bounded job queue length (0 = twice the worker count).
    #[serde(default)]
    pub queue_depth: usize,
    /// Abort the transfer when no chunk completes for this many seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Check the staged bytes against the declared SHA-256.
    #[serde(default = "default_verify_hash")]
    pub verify_hash: bool,
}

fn default_staging_dir() -> String {
    "data/staging".to_string()
}

fn default_upload_workers() -> usize {
    4
}

fn default_chunk_size() -> usize {
    100 * 1024 // 100KB
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_verify_hash() -> bool {
    true
}

impl UploadConfig {
    /// Effective job queue length.
    pub fn effective_queue_depth(&self) -> usize {
        if self.queue_depth == 0 {
            self.workers.max(1) * 2
        } else {
            self.queue_depth
        }
    }

    /// Idle timeout as a `Duration`.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            workers: default_upload_workers(),
            chunk_size: default_chunk_size(),
            queue_depth: 0,
            idle_timeout_secs: default_idle_timeout(),
            verify_hash: default_verify_hash(),
        }
    }
}

/// Quota configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Capacity assigned to newly registered storages, in bytes.
    #[serde(default = "default_max_size")]
    pub default_max_size: i64,
}

fn default_max_size() -> i64 {
    20 * 1024 * 1024 * 1024 // 20GB
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_max_size: default_max_size(),
        }
    }
}

/// Tree traversal configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeConfig {
    /// Children fetched per page during subtree walks.
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// Largest subtree a single copy may touch.
    #[serde(default = "default_max_subtree_nodes")]
    pub max_subtree_nodes: usize,
}

fn default_page_size() -> i64 {
    100
}

fn default_max_subtree_nodes() -> usize {
    100_000
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_subtree_nodes: default_max_subtree_nodes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/cumulus.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Object backend configuration.
    #[serde(default)]
    pub objects: ObjectsConfig,
    /// Upload pipeline configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Quota configuration.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Tree traversal configuration.
    #[serde(default)]
    pub tree: TreeConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CumulusError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CumulusError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CUMULUS_DATABASE_PATH`: Override the database file path
    /// - `CUMULUS_OBJECTS_ROOT`: Override the object backend root
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CUMULUS_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(root) = std::env::var("CUMULUS_OBJECTS_ROOT") {
            if !root.is_empty() {
                self.objects.root = root;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.upload.workers == 0 {
            return Err(CumulusError::Config(
                "upload.workers must be at least 1".to_string(),
            ));
        }
        if self.upload.chunk_size == 0 {
            return Err(CumulusError::Config(
                "upload.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.upload.idle_timeout_secs == 0 {
            return Err(CumulusError::Config(
                "upload.idle_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.tree.page_size <= 0 {
            return Err(CumulusError::Config(
                "tree.page_size must be positive".to_string(),
            ));
        }
        if self.quota.default_max_size < 0 {
            return Err(CumulusError::Config(
                "quota.default_max_size must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.database.path, "data/cumulus.db");
        assert_eq!(config.objects.root, "data/objects");

        assert_eq!(config.upload.staging_dir, "data/staging");
        assert_eq!(config.upload.workers, 4);
        assert_eq!(config.upload.chunk_size, 100 * 1024);
        assert_eq!(config.upload.effective_queue_depth(), 8);
        assert_eq!(config.upload.idle_timeout(), Duration::from_secs(30));
        assert!(config.upload.verify_hash);

        assert_eq!(config.quota.default_max_size, 21_474_836_480);

        assert_eq!(config.tree.page_size, 100);
        assert_eq!(config.tree.max_subtree_nodes, 100_000);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/cumulus.log");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[database]
path = "custom/db.sqlite"

[objects]
root = "custom/objects"

[upload]
staging_dir = "custom/staging"
workers = 8
chunk_size = 65536
queue_depth = 32
idle_timeout_secs = 10
verify_hash = false

[quota]
default_max_size = 1073741824

[tree]
page_size = 50
max_subtree_nodes = 1000

[logging]
level = "debug"
file = "custom/logs/app.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.database.path, "custom/db.sqlite");
        assert_eq!(config.objects.root, "custom/objects");
        assert_eq!(config.upload.staging_dir, "custom/staging");
        assert_eq!(config.upload.workers, 8);
        assert_eq!(config.upload.chunk_size, 65536);
        assert_eq!(config.upload.effective_queue_depth(), 32);
        assert_eq!(config.upload.idle_timeout_secs, 10);
        assert!(!config.upload.verify_hash);
        assert_eq!(config.quota.default_max_size, 1_073_741_824);
        assert_eq!(config.tree.page_size, 50);
        assert_eq!(config.tree.max_subtree_nodes, 1000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "custom/logs/app.log");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[upload]
workers = 2
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.upload.workers, 2);
        assert_eq!(config.upload.effective_queue_depth(), 4);

        // Default values
        assert_eq!(config.upload.chunk_size, 100 * 1024);
        assert_eq!(config.database.path, "data/cumulus.db");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.database.path, "data/cumulus.db");
        assert_eq!(config.tree.page_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_config() {
        let toml = "this is not valid toml [[[";
        let result = Config::parse(toml);

        assert!(result.is_err());
        if let Err(CumulusError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");

        assert!(matches!(result, Err(CumulusError::Io(_))));
    }

    #[test]
    fn test_apply_env_overrides() {
        let original = std::env::var("CUMULUS_OBJECTS_ROOT").ok();

        std::env::set_var("CUMULUS_OBJECTS_ROOT", "/srv/objects");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.objects.root, "/srv/objects");

        if let Some(val) = original {
            std::env::set_var("CUMULUS_OBJECTS_ROOT", val);
        } else {
            std::env::remove_var("CUMULUS_OBJECTS_ROOT");
        }
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.upload.workers = 0;

        let result = config.validate();
        if let Err(CumulusError::Config(msg)) = result {
            assert!(msg.contains("workers"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.upload.chunk_size = 0;

        assert!(matches!(config.validate(), Err(CumulusError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = Config::default();
        config.tree.page_size = 0;

        assert!(matches!(config.validate(), Err(CumulusError::Config(_))));
    }
}
