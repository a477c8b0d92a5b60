//! Merges per-source outcomes into one deduplicated run result.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use harvester_orchestrator_models::{RunReport, SourceReport, SourceStatus};
use harvester_scraper::{Item, PaginationOutcome, StopReason};

use crate::RunOutcome;

/// What happened to one requested source.
#[derive(Debug)]
pub enum SourceRun {
    /// The source was paginated to a stop condition.
    Paginated(PaginationOutcome),
    /// The source never paginated (unknown tag, bad config, crashed task).
    Skipped(SourceReport),
}

/// Maps a controller stop reason onto a report status.
#[must_use]
pub fn status_for(stop: &StopReason) -> SourceStatus {
    match stop {
        StopReason::EndOfData => SourceStatus::Exhausted,
        StopReason::TargetReached => SourceStatus::TargetReached,
        StopReason::MaxPages => SourceStatus::MaxPagesReached,
        StopReason::Failed(_) => SourceStatus::Failed,
        StopReason::Cancelled => SourceStatus::Cancelled,
    }
}

/// Builds the run result from per-source runs given in output order.
///
/// The first occurrence of each `(source, id)` pair is kept; later ones are
/// dropped and counted as duplicates for their source.
#[must_use]
pub fn aggregate(started_at: DateTime<Utc>, runs: Vec<SourceRun>) -> RunOutcome {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut items: Vec<Item> = Vec::new();
    let mut sources = Vec::with_capacity(runs.len());

    for run in runs {
        let outcome = match run {
            SourceRun::Skipped(report) => {
                sources.push(report);
                continue;
            }
            SourceRun::Paginated(outcome) => outcome,
        };

        let mut kept: u64 = 0;
        let mut duplicates: u64 = 0;
        for item in outcome.items {
            if seen.insert((item.source.clone(), item.id.clone())) {
                kept += 1;
                items.push(item);
            } else {
                log::debug!("{}: duplicate item {}", outcome.source, item.id);
                duplicates += 1;
            }
        }

        let (error_kind, error) = match &outcome.stop {
            StopReason::Failed(e) => (Some(e.kind()), Some(e.to_string())),
            _ => (None, None),
        };

        sources.push(SourceReport {
            source: outcome.source,
            items_fetched: kept,
            pages_visited: outcome.pages_visited,
            last_page: outcome.last_page,
            attempts: outcome.attempts,
            error_count: outcome.failures,
            duplicates,
            status: status_for(&outcome.stop),
            error_kind,
            error,
        });
    }

    let duplicates = sources.iter().map(|s| s.duplicates).sum();
    let report = RunReport {
        started_at,
        completed_at: Utc::now(),
        sources,
        total_items: items.len() as u64,
        duplicates,
    };

    RunOutcome { report, items }
}
