//! Queue configuration

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::QueueError;

/// Configuration for a [`ConcurrencyTaskQueue`](super::ConcurrencyTaskQueue)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Max tasks in the main processing set
    #[serde(default = "default_concurrency_capacity")]
    pub concurrency_capacity: usize,

    /// Max tasks moved aside into the supplemental set
    #[serde(default = "default_supplemental_capacity")]
    pub supplemental_capacity: usize,

    /// How long a backlog must persist before a main slot is escalated
    #[serde(default = "default_supplemental_wait_ms")]
    pub supplemental_wait_ms: u64,

    /// Drop submissions whose key is already waiting or processing
    #[serde(default = "default_deduplicate")]
    pub deduplicate: bool,

    /// Minimum spacing between successive launches
    #[serde(default)]
    pub min_launch_interval_ms: u64,
}

fn default_concurrency_capacity() -> usize {
    3
}

fn default_supplemental_capacity() -> usize {
    2
}

fn default_supplemental_wait_ms() -> u64 {
    3000
}

fn default_deduplicate() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_capacity: default_concurrency_capacity(),
            supplemental_capacity: default_supplemental_capacity(),
            supplemental_wait_ms: default_supplemental_wait_ms(),
            deduplicate: default_deduplicate(),
            min_launch_interval_ms: 0,
        }
    }
}

impl QueueConfig {
    /// Get the escalation wait as a Duration
    pub fn supplemental_wait(&self) -> Duration {
        Duration::from_millis(self.supplemental_wait_ms)
    }

    /// Get the launch spacing as a Duration
    pub fn min_launch_interval(&self) -> Duration {
        Duration::from_millis(self.min_launch_interval_ms)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.concurrency_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "concurrency_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        debug!(?path, "QueueConfig::load: called");
        if let Some(config_path) = path {
            return Self::read_from(config_path);
        }

        let found = Self::default_paths().into_iter().find(|p| p.exists());
        match found {
            Some(config_path) => {
                debug!(?config_path, "QueueConfig::load: found config file");
                Self::read_from(&config_path)
            }
            None => Ok(QueueConfig::default()),
        }
    }

    /// Candidate locations searched when no explicit path is given
    fn default_paths() -> Vec<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("taskpace").join("config.yml"))
            .into_iter()
            .chain(std::iter::once(PathBuf::from("taskpace.yml")))
            .collect()
    }

    fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
