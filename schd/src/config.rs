//! DDSS configuration loading
//!
//! Loads configuration from `~/.config/ddss/ddss.toml` (or `DDSS_CONFIG` env).
//! Missing files fall back to defaults; command-line flags override on top.

use crate::errors::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the service and the operator CLI
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DdssConfig {
    /// Path to the SQLite database holding the `services` table
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Address the HTTP server binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Number of blocking HTTP worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// SQLite busy timeout in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Root directory of the display blob store
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,

    /// Largest accepted HTTP request body; bigger uploads get 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

/// Default cap on HTTP request bodies (16 MiB).
pub const DEFAULT_MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

fn default_db_path() -> String {
    data_dir_entry("ddss.db")
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_blob_dir() -> String {
    data_dir_entry("blobs")
}

fn default_max_body_bytes() -> u64 {
    DEFAULT_MAX_BODY_BYTES
}

fn data_dir_entry(name: &str) -> String {
    dirs::data_dir()
        .map(|d| d.join("ddss").join(name).to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

impl Default for DdssConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            listen: default_listen(),
            workers: default_workers(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            blob_dir: default_blob_dir(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl DdssConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "DDSS_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "ddss.toml";

    /// Load configuration
    ///
    /// Resolution order:
    /// 1. `explicit` path (from `--config`); must exist
    /// 2. `DDSS_CONFIG` environment variable
    /// 3. `~/.config/ddss/ddss.toml`
    ///
    /// If an implicit config file doesn't exist, returns defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        let path = Self::resolve_config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "DDSS config not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let cfg: DdssConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("ddss")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".to_string()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be at least 1".to_string(),
            ));
        }
        if self.busy_timeout_ms == 0 {
            tracing::warn!("busy_timeout_ms is 0; concurrent writers will fail immediately");
        }
        Ok(())
    }

    /// Get the resolved database path (expanding ~ if needed)
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Get the resolved blob directory (expanding ~ if needed)
    pub fn resolved_blob_dir(&self) -> PathBuf {
        expand_home(&self.blob_dir)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = DdssConfig::default();
        assert_eq!(cfg.listen, "127.0.0.1:8080");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.pool_size, 8);
        assert_eq!(cfg.busy_timeout(), Duration::from_secs(5));
        assert!(cfg.db_path.ends_with("ddss.db"));
        assert_eq!(cfg.max_body_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            db_path = "/tmp/ddss-test.db"
        "#;

        let cfg = DdssConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.db_path, "/tmp/ddss-test.db");
        // Defaults should be applied
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.listen, "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            db_path = "~/ddss/state.db"
            listen = "0.0.0.0:9000"
            workers = 2
            pool_size = 3
            busy_timeout_ms = 250
            blob_dir = "/srv/ddss/blobs"
            max_body_bytes = 65536
        "#;

        let cfg = DdssConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.listen, "0.0.0.0:9000");
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.pool_size, 3);
        assert_eq!(cfg.busy_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.resolved_blob_dir(), PathBuf::from("/srv/ddss/blobs"));
        assert_eq!(cfg.max_body_bytes, 65536);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(cfg.resolved_db_path(), home.join("ddss/state.db"));
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = DdssConfig::parse("workers = 0").expect_err("should reject");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_body_limit_rejected() {
        let err = DdssConfig::parse("max_body_bytes = 0").expect_err("should reject");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = DdssConfig::parse("workers = \"many\"").expect_err("should reject");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let missing = tmp.path().join("nope.toml");
        let err = DdssConfig::load(Some(&missing)).expect_err("should fail");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_explicit_file() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = tmp.path().join("ddss.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:0\"\n").expect("write");
        let cfg = DdssConfig::load(Some(&path)).expect("should load");
        assert_eq!(cfg.listen, "127.0.0.1:0");
    }
}
