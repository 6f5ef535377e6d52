//! Configuration management for crashbeacon.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::location::Location;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "crashbeacon";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "feed.db";

/// Environment variable prefix. Nested keys are separated by `__`, as in
/// `CRASHBEACON_FEED__RECORD_KEY`.
const ENV_PREFIX: &str = "CRASHBEACON_";

/// Record key the deployed reporters write to.
pub const DEFAULT_RECORD_KEY: &str = "accedentlocation";

/// A record key is a single path segment without the characters a hosted
/// realtime database refuses.
const RECORD_KEY_PATTERN: &str = r"^[^.$#\[\]/]+$";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CRASHBEACON_`)
/// 2. TOML config file at `~/.config/crashbeacon/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed configuration.
    pub feed: FeedConfig,
    /// Bootstrap configuration.
    pub bootstrap: BootstrapConfig,
}

/// Where the location record lives and how it is watched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Path to the local feed database.
    /// Defaults to `~/.local/share/crashbeacon/feed.db`
    pub database_path: Option<PathBuf>,
    /// Key of the tracked location record.
    pub record_key: String,
    /// How often the local feed checks for changes, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Placeholder seeding on startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Seed a placeholder when the record is absent or malformed.
    pub enabled: bool,
    /// Latitude of the placeholder.
    pub fallback_latitude: f64,
    /// Longitude of the placeholder.
    pub fallback_longitude: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            record_key: DEFAULT_RECORD_KEY.to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_latitude: Location::FALLBACK.latitude(),
            fallback_longitude: Location::FALLBACK.longitude(),
        }
    }
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::figment(&config_file).extract::<Self>()?.validated()
    }

    fn figment(config_file: &std::path::Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let key_pattern = Regex::new(RECORD_KEY_PATTERN)
            .map_err(|e| Error::internal(format!("invalid record key pattern: {e}")))?;
        if !key_pattern.is_match(&self.feed.record_key) {
            return Err(Error::config_validation(format!(
                "record_key must be non-empty and may not contain '.', '$', '#', '[', ']' or '/': {:?}",
                self.feed.record_key
            )));
        }

        if self.feed.poll_interval_ms == 0 {
            return Err(Error::config_validation(
                "poll_interval_ms must be greater than 0",
            ));
        }

        self.fallback()?;
        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.feed
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed.poll_interval_ms)
    }

    /// The placeholder location written during bootstrap.
    ///
    /// # Errors
    ///
    /// Returns an error if either fallback coordinate is not finite.
    pub fn fallback(&self) -> Result<Location> {
        Location::new(
            self.bootstrap.fallback_latitude,
            self.bootstrap.fallback_longitude,
            0,
        )
        .map_err(|e| Error::config_validation(format!("invalid fallback location: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.feed.record_key, "accedentlocation");
        assert_eq!(config.feed.poll_interval_ms, 500);
        assert!(config.feed.database_path.is_none());
        assert!(config.bootstrap.enabled);
    }

    #[test]
    fn test_default_fallback() {
        let fallback = Config::default().fallback().unwrap();
        assert!(fallback.same_coordinates(&Location::FALLBACK));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_record_key() {
        for key in ["", "a.b", "a$b", "a#b", "a[0]", "a/b"] {
            let mut config = Config::default();
            config.feed.record_key = key.to_string();

            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("record_key"), "accepted {key:?}");
        }

        let mut config = Config::default();
        config.feed.record_key = "incident-42_b".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.feed.poll_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_ms"));
    }

    #[test]
    fn test_validate_non_finite_fallback() {
        let mut config = Config::default();
        config.bootstrap.fallback_longitude = f64::NAN;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("invalid fallback location"));
    }

    #[test]
    fn test_database_path_default() {
        let path = Config::default().database_path();
        assert!(path.to_string_lossy().contains("crashbeacon"));
        assert!(path.to_string_lossy().ends_with("feed.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.feed.database_path = Some(PathBuf::from("/custom/path/feed.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/feed.sqlite")
        );
    }

    #[test]
    fn test_poll_interval() {
        assert_eq!(Config::default().poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("crashbeacon"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        Jail::expect_with(|_| {
            let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")))
                .expect("defaults should load");
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_load_from_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "crashbeacon.toml",
                r#"
                [feed]
                record_key = "incident"
                poll_interval_ms = 50

                [bootstrap]
                enabled = false
                "#,
            )?;

            let config = Config::load_from(Some(PathBuf::from("crashbeacon.toml")))
                .expect("file should load");
            assert_eq!(config.feed.record_key, "incident");
            assert_eq!(config.poll_interval(), Duration::from_millis(50));
            assert!(!config.bootstrap.enabled);
            assert!(config.fallback().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("crashbeacon.toml", "[feed]\nrecord_key = \"from-file\"\n")?;
            jail.set_env("CRASHBEACON_FEED__RECORD_KEY", "from-env");
            jail.set_env("CRASHBEACON_FEED__POLL_INTERVAL_MS", "25");

            let config = Config::load_from(Some(PathBuf::from("crashbeacon.toml")))
                .expect("env should merge");
            assert_eq!(config.feed.record_key, "from-env");
            assert_eq!(config.feed.poll_interval_ms, 25);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.create_file("crashbeacon.toml", "[feed]\nrecord_key = \"a.b\"\n")?;

            let err = Config::load_from(Some(PathBuf::from("crashbeacon.toml"))).unwrap_err();
            assert!(matches!(err, Error::ConfigValidation { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        Jail::expect_with(|jail| {
            jail.create_file("crashbeacon.toml", "[feed\nrecord_key = ")?;

            let err = Config::load_from(Some(PathBuf::from("crashbeacon.toml"))).unwrap_err();
            assert!(matches!(err, Error::ConfigLoad(_)));
            Ok(())
        });
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("record_key"));
        assert!(json.contains("fallback_latitude"));
    }

    #[test]
    fn test_feed_config_deserialize() {
        let json = r#"{"record_key": "k", "poll_interval_ms": 10}"#;
        let feed: FeedConfig = serde_json::from_str(json).unwrap();
        assert_eq!(feed.record_key, "k");
        assert_eq!(feed.poll_interval_ms, 10);
        assert!(feed.database_path.is_none());
    }
}
