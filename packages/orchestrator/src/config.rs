//! Engine-wide settings, loaded from an optional TOML file.

use std::path::Path;
use std::time::Duration;

use harvester_scraper::RetryPolicy;
use serde::Deserialize;

use crate::OrchestratorError;

/// Settings shared by every source in a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay before the first retry, in milliseconds.
    pub retry_base_ms: u64,
    /// Upper bound on any single retry delay, in milliseconds.
    pub retry_cap_ms: u64,
    /// Maximum number of sources paginating at once.
    pub max_concurrent_sources: usize,
    /// Minimum spacing between the starts of two sources, in milliseconds.
    pub source_start_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 2_000,
            retry_cap_ms: 32_000,
            max_concurrent_sources: 4,
            source_start_delay_ms: 250,
        }
    }
}

impl OrchestratorConfig {
    /// Parses settings from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self, OrchestratorError> {
        Ok(toml::de::from_str(toml_str)?)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Io`] if the file cannot be read, or
    /// [`OrchestratorError::Config`] if it is malformed.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Backoff policy built from the retry settings.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_cap_ms),
        )
    }

    /// Spacing between source starts.
    #[must_use]
    pub const fn source_start_delay(&self) -> Duration {
        Duration::from_millis(self.source_start_delay_ms)
    }

    /// Parallelism bound; never below one.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_sources.max(1)
    }
}
