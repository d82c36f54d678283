//! Controller configuration
//!
//! Loaded from YAML or TOML, chosen by file extension.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML could not be parsed
    #[error("invalid yaml in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// TOML could not be parsed
    #[error("invalid toml in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Extension is neither YAML nor TOML
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Values parsed but are unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// How jobs are spread over a set of build clusters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum BuildClusterDistributionConfig {
    /// Each cluster in turn
    RoundRobin { clusters: Vec<String> },
    /// Proportionally to the weight of each cluster
    Weighted { clusters: Vec<WeightedCluster> },
}

/// Cluster with a relative weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedCluster {
    /// Cluster name
    pub name: String,
    /// Relative weight, at least 1
    pub weight: u32,
}

/// Work queue retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackoffConfig {
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Maximum retry delay in seconds
    pub max_delay_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_secs: 1000,
        }
    }
}

impl BackoffConfig {
    /// First retry delay
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum retry delay
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Namespace verification jobs are created in
    pub job_namespace: String,
    /// Architecture releases are verified for
    pub architecture: String,
    /// Workers per reconciliation loop
    pub workers: usize,
    /// Job template configuration file
    pub job_config_path: Option<PathBuf>,
    /// Build cluster distributions
    pub build_cluster_distributions: Vec<BuildClusterDistributionConfig>,
    /// Interval at which every release is re-queued, in seconds
    pub resync_interval_secs: u64,
    /// Queue retry settings
    pub backoff: BackoffConfig,
    /// Logging
    pub log: LogConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            job_namespace: "ci".to_string(),
            architecture: "amd64".to_string(),
            workers: 4,
            job_config_path: None,
            build_cluster_distributions: Vec::new(),
            resync_interval_secs: 300,
            backoff: BackoffConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load and validate a configuration file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values are usable
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_namespace.is_empty() {
            return Err(ConfigError::Invalid("jobNamespace must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.resync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "resyncIntervalSecs must be at least 1".into(),
            ));
        }
        for distribution in &self.build_cluster_distributions {
            match distribution {
                BuildClusterDistributionConfig::RoundRobin { clusters } if clusters.is_empty() => {
                    return Err(ConfigError::Invalid(
                        "roundRobin distribution needs at least one cluster".into(),
                    ));
                }
                BuildClusterDistributionConfig::Weighted { clusters } => {
                    if clusters.is_empty() {
                        return Err(ConfigError::Invalid(
                            "weighted distribution needs at least one cluster".into(),
                        ));
                    }
                    if let Some(c) = clusters.iter().find(|c| c.weight == 0) {
                        return Err(ConfigError::Invalid(format!(
                            "cluster {} has weight 0",
                            c.name
                        )));
                    }
                }
                BuildClusterDistributionConfig::RoundRobin { .. } => {}
            }
        }
        Ok(())
    }

    /// Resync interval
    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

/// Deserialize a YAML or TOML file by extension
///
/// # Errors
/// Returns error if the file cannot be read or parsed.
pub fn load_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(&data).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        Some("toml") => toml::from_str(&data).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        }),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}
