#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch orchestration across every registered source.
//!
//! [`BatchOrchestrator::run`] drives one [`PaginationController`] per source
//! in its own tokio task, with at most `max_concurrent_sources` in flight and
//! source starts spaced by `source_start_delay`. A source that fails, or
//! whose adapter panics, only affects its own report entry.

pub mod aggregate;
pub mod config;

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt as _};
use harvester_orchestrator_models::{RunReport, SourceReport};
use harvester_scraper::{FetchErrorKind, Item, PaginationController, RateLimiter, RetryExecutor};
use harvester_source::SourceRegistry;
use harvester_source::progress::ProgressCallback;
use tokio_util::sync::CancellationToken;

pub use aggregate::SourceRun;
pub use config::OrchestratorConfig;

/// Key used on the start-gate limiter.
const START_GATE: &str = "start";

/// Errors that abort a whole run, or prevent one from starting.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A source task was aborted before finishing (runtime shutdown).
    #[error("task for source '{source_tag}' was aborted")]
    TaskAborted {
        /// Source whose task was lost.
        source_tag: String,
    },

    /// Engine settings could not be parsed.
    #[error("invalid engine config: {0}")]
    Config(#[from] toml::de::Error),

    /// Engine settings could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Per-source and total counters.
    pub report: RunReport,
    /// Deduplicated items in source order.
    pub items: Vec<Item>,
}

/// Runs sources from a [`SourceRegistry`] and aggregates their items.
pub struct BatchOrchestrator {
    registry: Arc<SourceRegistry>,
    config: OrchestratorConfig,
    limiter: Arc<RateLimiter>,
    start_gate: Arc<RateLimiter>,
    retry: RetryExecutor,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl BatchOrchestrator {
    /// Creates an orchestrator over `registry`.
    ///
    /// Request spacing is tracked per source for the orchestrator's lifetime,
    /// so consecutive runs stay polite to each source.
    #[must_use]
    pub fn new(registry: Arc<SourceRegistry>, config: OrchestratorConfig) -> Self {
        let limiter = Arc::new(RateLimiter::from_configs(registry.configs()));
        let start_gate =
            Arc::new(RateLimiter::new().with_interval(START_GATE, config.source_start_delay()));
        let retry = RetryExecutor::new(config.retry_policy());
        Self {
            registry,
            config,
            limiter,
            start_gate,
            retry,
            progress: None,
        }
    }

    /// Reports one increment per finished source.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The registry this orchestrator runs.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Engine settings.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs every registered source.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskAborted`] if a source task is lost to
    /// runtime shutdown. Source failures never fail the run.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome, OrchestratorError> {
        let tags: Vec<String> = self.registry.tags().into_iter().map(str::to_owned).collect();
        self.run_sources(&tags, cancel).await
    }

    /// Runs the given sources. Unknown tags are reported as failed; repeated
    /// tags run once.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskAborted`] if a source task is lost to
    /// runtime shutdown.
    pub async fn run_sources(
        &self,
        tags: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        let started_at = Utc::now();
        let mut requested: Vec<&str> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !requested.contains(&tag.as_str()) {
                requested.push(tag);
            }
        }

        log::info!(
            "Starting run over {} sources (concurrency={})",
            requested.len(),
            self.config.concurrency()
        );
        if let Some(p) = &self.progress {
            p.set_total(requested.len() as u64);
        }

        let pending: Vec<_> = requested
            .iter()
            .copied()
            .enumerate()
            .map(move |(index, tag)| async move {
                let run = self.run_one(tag, cancel).await;
                if let Some(p) = &self.progress {
                    p.set_message(tag.to_owned());
                    p.inc(1);
                }
                (index, run)
            })
            .collect();
        let mut finished: Vec<(usize, Result<SourceRun, OrchestratorError>)> =
            stream::iter(pending)
                .buffer_unordered(self.config.concurrency())
                .collect()
                .await;
        finished.sort_by_key(|(index, _)| *index);

        let runs = finished
            .into_iter()
            .map(|(_, run)| run)
            .collect::<Result<Vec<_>, _>>()?;
        let outcome = aggregate::aggregate(started_at, runs);

        log::info!(
            "Run finished: {} items, {} duplicates, {}/{} sources failed",
            outcome.report.total_items,
            outcome.report.duplicates,
            outcome.report.failed_count(),
            outcome.report.sources.len()
        );
        if let Some(p) = &self.progress {
            p.finish(format!("{} items", outcome.report.total_items));
        }

        Ok(outcome)
    }

    async fn run_one(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<SourceRun, OrchestratorError> {
        let Some(source) = self.registry.get(tag) else {
            log::warn!("{tag}: not registered");
            return Ok(SourceRun::Skipped(SourceReport::failed(
                tag,
                FetchErrorKind::Permanent,
                format!("source '{tag}' is not registered"),
            )));
        };

        if let Err(e) = source.config.validate() {
            log::error!("{tag}: invalid configuration: {e}");
            return Ok(SourceRun::Skipped(SourceReport::failed(
                tag,
                FetchErrorKind::Permanent,
                e.to_string(),
            )));
        }

        let config = source.config.clone();
        let adapter = Arc::clone(&source.adapter);
        let limiter = Arc::clone(&self.limiter);
        let start_gate = Arc::clone(&self.start_gate);
        let retry = self.retry;
        let cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            if start_gate
                .acquire_or_cancel(START_GATE, &cancel)
                .await
                .is_err()
            {
                log::debug!("{}: cancelled before start", config.tag);
            }
            PaginationController::new(&config, &*adapter, &limiter, &retry, &cancel)
                .run()
                .await
        });

        match handle.await {
            Ok(outcome) => Ok(SourceRun::Paginated(outcome)),
            Err(e) if e.is_panic() => {
                log::error!("{tag}: source task panicked");
                Ok(SourceRun::Skipped(SourceReport::failed(
                    tag,
                    FetchErrorKind::Permanent,
                    "source task panicked",
                )))
            }
            Err(_) => Err(OrchestratorError::TaskAborted {
                source_tag: tag.to_owned(),
            }),
        }
    }
}
