//! Configuration for forebear.
//!
//! Configuration is loaded with precedence: overrides > Env vars > Config file > Defaults
//!
//! Environment variables use the `FOREBEAR_` prefix and `__` between section
//! and key, e.g. `FOREBEAR_QUEUE__TICK_INTERVAL_MS=1000`.
//!
//! # Example config file (forebear.toml)
//! ```toml
//! [queue]
//! tick_interval_ms = 5000
//! max_throttle_retries = 20
//!
//! [builder]
//! birth_year_cutoff = 1600
//!
//! [cluster]
//! strategy = "greedy"
//!
//! [storage]
//! data_dir = "/var/lib/forebear"
//! ```

mod defaults;

pub use defaults::*;

use crate::cluster::ClusterStrategy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForebearConfig {
    /// Request queue pacing
    pub queue: QueueConfig,
    /// Tree builder limits
    pub builder: BuilderConfig,
    /// Clustering strategy
    pub cluster: ClusterConfig,
    /// Snapshot location
    pub storage: StorageConfig,
}

impl ForebearConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ForebearConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("FOREBEAR_").split("__"));

        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// Request queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Wait between attempts of a throttled operation (milliseconds)
    pub tick_interval_ms: u64,
    /// Retries allowed per throttled operation; unlimited when absent
    pub max_throttle_retries: Option<u32>,
}

impl QueueConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_throttle_retries: DEFAULT_MAX_THROTTLE_RETRIES,
        }
    }
}

/// Tree builder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Ancestry above persons born before this year is not fetched
    pub birth_year_cutoff: i32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            birth_year_cutoff: DEFAULT_BIRTH_YEAR_CUTOFF,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub strategy: ClusterStrategy,
}

/// Snapshot storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the snapshot and root lists
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

/// Overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builder: Option<BuilderOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_throttle_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_year_cutoff: Option<i32>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = ForebearConfig::default();
        assert_eq!(config.queue.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(config.queue.max_throttle_retries, None);
        assert_eq!(config.builder.birth_year_cutoff, DEFAULT_BIRTH_YEAR_CUTOFF);
        assert_eq!(config.cluster.strategy, ClusterStrategy::OverlapMerge);
        assert_eq!(config.queue.tick_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "forebear.toml",
                r#"
                [queue]
                tick_interval_ms = 250
                max_throttle_retries = 4

                [cluster]
                strategy = "greedy"
                "#,
            )?;
            jail.set_env("FOREBEAR_QUEUE__TICK_INTERVAL_MS", "100");
            jail.set_env("FOREBEAR_BUILDER__BIRTH_YEAR_CUTOFF", "1700");

            let overrides = ConfigOverrides {
                builder: Some(BuilderOverrides {
                    birth_year_cutoff: Some(1750),
                }),
                ..ConfigOverrides::default()
            };
            let config = ForebearConfig::load(Some("forebear.toml"), overrides)
                .map_err(|e| e.message)?;

            assert_eq!(config.queue.tick_interval_ms, 100);
            assert_eq!(config.queue.max_throttle_retries, Some(4));
            assert_eq!(config.cluster.strategy, ClusterStrategy::Greedy);
            assert_eq!(config.builder.birth_year_cutoff, 1750);
            Ok(())
        });
    }

    #[test]
    fn test_bad_value_is_reported() {
        Jail::expect_with(|jail| {
            jail.set_env("FOREBEAR_QUEUE__TICK_INTERVAL_MS", "soon");
            let error = ForebearConfig::from_env(None).unwrap_err();
            assert!(error.to_string().starts_with("configuration error"));
            Ok(())
        });
    }
}
