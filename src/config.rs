//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Persistent store configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the store file inside the shared group directory
    pub path: PathBuf,
}

/// Bounded cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding per-(kind, user) feed snapshots
    pub directory: PathBuf,
    /// Directory holding the search history file
    pub documents_directory: PathBuf,
    /// Maximum entries kept per feed snapshot (default: 100)
    pub max_items: usize,
    /// Quiet period before a changed feed is snapshotted (default: 500ms)
    pub snapshot_debounce_ms: u64,
}

impl CacheConfig {
    pub fn snapshot_debounce(&self) -> Duration {
        Duration::from_millis(self.snapshot_debounce_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEEDSYNC__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("store.path", "data/group/feedsync.sqlite")?
            .set_default("cache.directory", "data/caches")?
            .set_default("cache.documents_directory", "data/documents")?
            .set_default("cache.max_items", 100)?
            .set_default("cache.snapshot_debounce_ms", 500)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FEEDSYNC__*)
            .add_source(
                Environment::with_prefix("FEEDSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.cache.max_items == 0 {
            return Err(crate::error::AppError::Config(
                "cache.max_items must be greater than 0".to_string(),
            ));
        }

        for (name, path) in [
            ("store.path", &self.store.path),
            ("cache.directory", &self.cache.directory),
            ("cache.documents_directory", &self.cache.documents_directory),
        ] {
            if path.as_os_str().is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "{name} must not be empty"
                )));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            tracing::warn!(
                format = %self.logging.format,
                "Unknown logging.format; falling back to pretty"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            store: StoreConfig {
                path: PathBuf::from("/tmp/feedsync-test/group/store.sqlite"),
            },
            cache: CacheConfig {
                directory: PathBuf::from("/tmp/feedsync-test/caches"),
                documents_directory: PathBuf::from("/tmp/feedsync-test/documents"),
                max_items: 100,
                snapshot_debounce_ms: 500,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.snapshot_debounce(), Duration::from_millis(500));
    }

    #[test]
    fn validate_rejects_zero_cache_capacity() {
        let mut config = valid_config();
        config.cache.max_items = 0;

        let error = config
            .validate()
            .expect_err("a zero-capacity cache must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("cache.max_items")
        ));
    }

    #[test]
    fn validate_rejects_empty_store_path() {
        let mut config = valid_config();
        config.store.path = PathBuf::new();

        let error = config
            .validate()
            .expect_err("an empty store path must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("store.path")
        ));
    }
}
