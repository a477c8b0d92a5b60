#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Run report and snapshot types.
//!
//! These are the read-only values handed to callers after a run: a
//! [`RunReport`] with one [`SourceReport`] per source, and the [`Snapshot`]
//! persisted by the snapshot store.

use chrono::{DateTime, Utc};
use harvester_scraper_models::{FetchErrorKind, Item};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How a source's pagination ended.
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
pub enum SourceStatus {
    /// The source returned an empty page.
    Exhausted,
    /// The accumulated item count reached the configured target.
    TargetReached,
    /// The page ceiling was reached.
    MaxPagesReached,
    /// The source stopped on an error. Items from earlier pages are kept.
    Failed,
    /// The run was cancelled while this source was active.
    Cancelled,
}

impl SourceStatus {
    /// Whether the source ended without an error.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            Self::Exhausted | Self::TargetReached | Self::MaxPagesReached
        )
    }
}

/// Per-source entry of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    /// Source tag.
    pub source: String,
    /// Items kept after deduplication.
    pub items_fetched: u64,
    /// Pages fetched successfully.
    pub pages_visited: u32,
    /// Last page attempted (0 if none was).
    pub last_page: u32,
    /// Total fetch attempts, retries included.
    pub attempts: u32,
    /// Failed fetch attempts.
    pub error_count: u32,
    /// Items dropped as repeats of an earlier `(source, id)` pair.
    pub duplicates: u64,
    /// Terminal status.
    pub status: SourceStatus,
    /// Classification of the terminal error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FetchErrorKind>,
    /// Terminal error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    /// A report for a source that failed before fetching anything.
    #[must_use]
    pub fn failed(source: &str, kind: FetchErrorKind, error: impl Into<String>) -> Self {
        Self {
            source: source.to_owned(),
            items_fetched: 0,
            pages_visited: 0,
            last_page: 0,
            attempts: 0,
            error_count: 0,
            duplicates: 0,
            status: SourceStatus::Failed,
            error_kind: Some(kind),
            error: Some(error.into()),
        }
    }
}

/// Summary of one run across all sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the last source finished.
    pub completed_at: DateTime<Utc>,
    /// One entry per requested source, in registry order.
    pub sources: Vec<SourceReport>,
    /// Items kept across all sources after deduplication.
    pub total_items: u64,
    /// Duplicates dropped across all sources.
    pub duplicates: u64,
}

impl RunReport {
    /// Looks up a source's entry by tag.
    #[must_use]
    pub fn source(&self, tag: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == tag)
    }

    /// Number of sources that ended with [`SourceStatus::Failed`].
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.status == SourceStatus::Failed)
            .count()
    }

    /// Whether every source failed. False for a run with no sources.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.sources.is_empty() && self.failed_count() == self.sources.len()
    }

    /// Whether any source was cut short by cancellation.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.status == SourceStatus::Cancelled)
    }
}

/// The latest aggregated item set, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Deduplicated items in registry order.
    pub items: Vec<Item>,
    /// When the run that produced these items finished.
    pub completed_at: DateTime<Utc>,
    /// When the scheduler plans the next run. Absent once it has stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn report(statuses: &[SourceStatus]) -> RunReport {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        RunReport {
            started_at: at,
            completed_at: at,
            sources: statuses
                .iter()
                .enumerate()
                .map(|(i, status)| SourceReport {
                    status: *status,
                    ..SourceReport::failed(&format!("s{i}"), FetchErrorKind::Permanent, "x")
                })
                .collect(),
            total_items: 0,
            duplicates: 0,
        }
    }

    #[test]
    fn all_failed_requires_every_source_failed() {
        assert!(report(&[SourceStatus::Failed, SourceStatus::Failed]).all_failed());
        assert!(!report(&[SourceStatus::Failed, SourceStatus::Exhausted]).all_failed());
        assert!(!report(&[]).all_failed());
    }

    #[test]
    fn looks_up_sources_by_tag() {
        let report = report(&[SourceStatus::Exhausted, SourceStatus::Cancelled]);
        assert_eq!(report.source("s1").unwrap().status, SourceStatus::Cancelled);
        assert!(report.source("nope").is_none());
        assert!(report.was_cancelled());
    }

    #[test]
    fn snapshot_uses_camel_case_and_omits_next_run() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let snapshot = Snapshot {
            items: vec![Item::new("a", "1", serde_json::json!({ "k": "v" }))],
            completed_at: at,
            next_run_at: None,
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["completedAt"], "2026-03-04T05:06:07Z");
        assert!(json.get("nextRunAt").is_none());
        assert_eq!(json["items"][0]["source"], "a");

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn status_names_are_screaming_snake_case() {
        assert_eq!(SourceStatus::MaxPagesReached.to_string(), "MAX_PAGES_REACHED");
        assert!(SourceStatus::TargetReached.is_success());
        assert!(!SourceStatus::Cancelled.is_success());
    }
}
