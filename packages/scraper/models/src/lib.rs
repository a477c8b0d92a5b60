#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core scraping types shared by every harvester crate.
//!
//! An [`Item`] is one scraped record. A [`SourceConfig`] describes how
//! politely and how far a single source may be paginated. A page fetch
//! produces a [`FetchResult`]: a page of items (empty means the source has
//! no more data) or a [`FetchError`] classified by [`FetchErrorKind`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A single scraped record.
///
/// The engine never looks inside `payload`; only `id` and `source` are used
/// for deduplication and reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Identifier, unique within a source for one run.
    pub id: String,
    /// Tag of the source that produced this item.
    pub source: String,
    /// Parsed fields, free-form.
    pub payload: serde_json::Value,
}

impl Item {
    /// Creates an item for the given source.
    #[must_use]
    pub fn new(source: &str, id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            source: source.to_owned(),
            payload,
        }
    }
}

/// Outcome of fetching one page.
///
/// `Ok` with an empty vector is the normal end-of-data signal, not an error.
pub type FetchResult = Result<Vec<Item>, FetchError>;

/// Classification of a fetch failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchErrorKind {
    /// Timeouts, 5xx responses, rate limiting. Eligible for retry.
    Transient,
    /// Malformed configuration or an adapter contract violation.
    Permanent,
    /// A transient error outlived the whole retry budget.
    RetriesExhausted,
    /// The run was cancelled while waiting.
    Cancelled,
}

/// Errors produced while fetching a page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// A failure that may succeed if attempted again.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that will not go away by retrying.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Every attempt failed with a transient error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total number of attempts made, including the first.
        attempts: u32,
        /// Message of the final transient failure.
        last: String,
    },

    /// Cancellation was observed before the operation could complete.
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Transient(_) => FetchErrorKind::Transient,
            Self::Permanent(_) => FetchErrorKind::Permanent,
            Self::RetriesExhausted { .. } => FetchErrorKind::RetriesExhausted,
            Self::Cancelled => FetchErrorKind::Cancelled,
        }
    }

    /// Whether a retry could change the outcome.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ConfigError> for FetchError {
    fn from(value: ConfigError) -> Self {
        Self::Permanent(value.to_string())
    }
}

/// A [`SourceConfig`] that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The source tag is empty.
    #[error("source tag must not be empty")]
    EmptyTag,

    /// The base address is empty.
    #[error("{tag}: base address must not be empty")]
    EmptyBaseUrl {
        /// Offending source.
        tag: String,
    },

    /// A numeric limit is zero where at least one is required.
    #[error("{tag}: {field} must be at least 1")]
    ZeroLimit {
        /// Offending source.
        tag: String,
        /// Name of the field.
        field: &'static str,
    },
}

/// Immutable per-source configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Unique source tag (e.g. `"crates_io"`).
    pub tag: String,
    /// Base address the adapter builds page URLs from.
    pub base_url: String,
    /// Minimum spacing between two requests to this source.
    pub min_interval: Duration,
    /// Extra attempts allowed after a transient failure.
    pub max_retries: u32,
    /// Pagination ceiling.
    pub max_pages: u32,
    /// Number of items requested per page.
    pub page_size: u32,
    /// Stop early once this many items have been accumulated.
    pub target_item_count: u64,
}

impl SourceConfig {
    /// Creates a configuration with permissive defaults: no spacing, three
    /// retries, 10 pages of 50 items, and a target of 500 items.
    #[must_use]
    pub fn new(tag: &str, base_url: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            base_url: base_url.to_owned(),
            min_interval: Duration::ZERO,
            max_retries: 3,
            max_pages: 10,
            page_size: 50,
            target_item_count: 500,
        }
    }

    /// Sets the minimum spacing between requests.
    #[must_use]
    pub const fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the pagination ceiling.
    #[must_use]
    pub const fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages;
        self
    }

    /// Sets the per-page item count.
    #[must_use]
    pub const fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the stop-early threshold.
    #[must_use]
    pub const fn with_target_item_count(mut self, target: u64) -> Self {
        self.target_item_count = target;
        self
    }

    /// Checks that the configuration can drive a pagination run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty tag or base address, or a zero
    /// page ceiling, page size, or target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.trim().is_empty() {
            return Err(ConfigError::EmptyTag);
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl {
                tag: self.tag.clone(),
            });
        }
        let zero = |field| ConfigError::ZeroLimit {
            tag: self.tag.clone(),
            field,
        };
        if self.max_pages == 0 {
            return Err(zero("max_pages"));
        }
        if self.page_size == 0 {
            return Err(zero("page_size"));
        }
        if self.target_item_count == 0 {
            return Err(zero("target_item_count"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SourceConfig::new("a", "https://example.com").validate().is_ok());
    }

    #[test]
    fn rejects_empty_tag() {
        let config = SourceConfig::new("  ", "https://example.com");
        assert_eq!(config.validate(), Err(ConfigError::EmptyTag));
    }

    #[test]
    fn rejects_zero_max_pages() {
        let config = SourceConfig::new("a", "https://example.com").with_max_pages(0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit {
                tag: "a".to_owned(),
                field: "max_pages",
            })
        );
    }

    #[test]
    fn config_error_becomes_permanent_fetch_error() {
        let err: FetchError = ConfigError::EmptyTag.into();
        assert_eq!(err.kind(), FetchErrorKind::Permanent);
        assert!(!err.is_transient());
    }

    #[test]
    fn kind_names_are_screaming_snake_case() {
        assert_eq!(
            FetchErrorKind::RetriesExhausted.to_string(),
            "RETRIES_EXHAUSTED"
        );
    }
}
