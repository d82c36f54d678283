//! Job template configuration
//!
//! The job-execution platform's configuration lists the periodic templates
//! verifications may refer to. It is shared read-only by every worker and can
//! be reloaded in place.

use crate::config::{load_file, ConfigError};
use parking_lot::RwLock;
use rvc_core::JobTemplate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Set of known job templates
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Periodic templates
    #[serde(default)]
    pub periodics: Vec<JobTemplate>,
}

impl JobConfig {
    /// Template by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&JobTemplate> {
        self.periodics.iter().find(|p| p.name == name)
    }
}

/// Source of the current job configuration
pub trait JobConfigLoader: Send + Sync {
    /// Current configuration; `None` when no templates have been loaded
    fn config(&self) -> Option<Arc<JobConfig>>;
}

/// Fixed configuration
#[derive(Debug, Clone, Default)]
pub struct StaticJobConfig(Option<Arc<JobConfig>>);

impl StaticJobConfig {
    /// Wrap a configuration
    #[must_use]
    pub fn new(config: JobConfig) -> Self {
        Self(Some(Arc::new(config)))
    }

    /// No configuration at all
    #[must_use]
    pub fn empty() -> Self {
        Self(None)
    }
}

impl JobConfigLoader for StaticJobConfig {
    fn config(&self) -> Option<Arc<JobConfig>> {
        self.0.clone()
    }
}

/// Configuration read from a YAML or TOML file
#[derive(Debug)]
pub struct FileJobConfigLoader {
    path: PathBuf,
    current: RwLock<Option<Arc<JobConfig>>>,
}

impl FileJobConfigLoader {
    /// Load `path`
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let loader = Self {
            path: path.into(),
            current: RwLock::new(None),
        };
        loader.reload()?;
        Ok(loader)
    }

    /// Re-read the file; the previous configuration stays active on error
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let config: JobConfig = load_file(&self.path)?;
        tracing::info!(
            path = %self.path.display(),
            templates = config.periodics.len(),
            "loaded job configuration"
        );
        *self.current.write() = Some(Arc::new(config));
        Ok(())
    }

    /// File backing this loader
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobConfigLoader for FileJobConfigLoader {
    fn config(&self) -> Option<Arc<JobConfig>> {
        self.current.read().clone()
    }
}
