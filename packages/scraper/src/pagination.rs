//! Drives one [`SourceAdapter`] across pages until a stop condition.
//!
//! States: `Idle → Fetching → {Accumulating, Stopping} → Done`.
//!
//! Every page goes through the [`RateLimiter`] and then the
//! [`RetryExecutor`]. After each page the stop conditions are checked in
//! order:
//!
//! 1. the fetch failed after retries: stop and flag an error, keeping the
//!    items from earlier pages;
//! 2. the page was empty: normal end of data;
//! 3. the accumulated item count reached the target;
//! 4. the page number reached the page ceiling.
//!
//! Pages are strictly sequential, so a source is bounded by
//! `max_pages × (1 + max_retries)` fetch attempts.

use harvester_scraper_models::{FetchError, Item, SourceConfig};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

use crate::{RateLimiter, RetryExecutor, SourceAdapter};

/// Lifecycle of a single source's pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PaginationState {
    /// Not started.
    Idle,
    /// Waiting on the rate limiter or a page fetch.
    Fetching,
    /// Adding a page's items to the accumulated set.
    Accumulating,
    /// A stop condition was hit.
    Stopping,
    /// Finished; the outcome has been produced.
    Done,
}

/// Why pagination ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A page could not be fetched.
    Failed(FetchError),
    /// The source returned an empty page.
    EndOfData,
    /// The accumulated item count reached the configured target.
    TargetReached,
    /// The configured page ceiling was reached.
    MaxPages,
    /// The run was cancelled.
    Cancelled,
}

/// Everything a finished controller hands back to its caller.
#[derive(Debug)]
pub struct PaginationOutcome {
    /// Source tag.
    pub source: String,
    /// Items accumulated across all successful pages, in page order.
    pub items: Vec<Item>,
    /// Last page number attempted (0 if none was).
    pub last_page: u32,
    /// Pages fetched successfully, including a final empty page.
    pub pages_visited: u32,
    /// Total fetch attempts, retries included.
    pub attempts: u32,
    /// Fetch attempts that failed.
    pub failures: u32,
    /// Terminal condition.
    pub stop: StopReason,
}

impl PaginationOutcome {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_owned(),
            items: Vec::new(),
            last_page: 0,
            pages_visited: 0,
            attempts: 0,
            failures: 0,
            stop: StopReason::EndOfData,
        }
    }

    /// Whether pagination ended because of an error.
    #[must_use]
    pub const fn errored(&self) -> bool {
        matches!(self.stop, StopReason::Failed(_))
    }
}

/// Per-source pagination driver. Owns all pagination state; the adapter
/// stays stateless.
pub struct PaginationController<'a> {
    config: &'a SourceConfig,
    adapter: &'a dyn SourceAdapter,
    limiter: &'a RateLimiter,
    retry: &'a RetryExecutor,
    cancel: &'a CancellationToken,
    state: PaginationState,
}

impl<'a> PaginationController<'a> {
    /// Creates an idle controller.
    #[must_use]
    pub const fn new(
        config: &'a SourceConfig,
        adapter: &'a dyn SourceAdapter,
        limiter: &'a RateLimiter,
        retry: &'a RetryExecutor,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            adapter,
            limiter,
            retry,
            cancel,
            state: PaginationState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PaginationState {
        self.state
    }

    /// Paginates until a stop condition and returns what was gathered.
    ///
    /// Never fails: errors end up in [`PaginationOutcome::stop`].
    pub async fn run(mut self) -> PaginationOutcome {
        let config = self.config;
        let tag = config.tag.as_str();
        let mut outcome = PaginationOutcome::new(tag);
        let mut page: u32 = 1;

        self.transition(PaginationState::Fetching);

        let stop = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self
                .limiter
                .acquire_or_cancel(tag, self.cancel)
                .await
                .is_err()
            {
                break StopReason::Cancelled;
            }

            outcome.last_page = page;
            let adapter = self.adapter;
            let retried = self
                .retry
                .run(|| adapter.fetch_page(page), config.max_retries, self.cancel)
                .await;
            outcome.attempts += retried.attempts;
            outcome.failures += retried.failures;

            let items = match retried.result.and_then(|items| self.check_contract(items)) {
                Ok(items) => items,
                Err(FetchError::Cancelled) => break StopReason::Cancelled,
                Err(e) => {
                    log::warn!("{tag}: page {page} failed: {e}");
                    break StopReason::Failed(e);
                }
            };
            outcome.pages_visited += 1;

            if items.is_empty() {
                log::debug!("{tag}: page {page} was empty, end of data");
                break StopReason::EndOfData;
            }

            self.transition(PaginationState::Accumulating);
            outcome.items.extend(items);

            if outcome.items.len() as u64 >= config.target_item_count {
                log::debug!(
                    "{tag}: reached target of {} items",
                    config.target_item_count
                );
                break StopReason::TargetReached;
            }
            if page >= config.max_pages {
                log::info!("{tag}: reached max pages ({}), stopping", config.max_pages);
                break StopReason::MaxPages;
            }

            page += 1;
            self.transition(PaginationState::Fetching);
        };

        self.transition(PaginationState::Stopping);
        outcome.stop = stop;

        log::info!(
            "{tag}: {} items from {} pages ({:?})",
            outcome.items.len(),
            outcome.pages_visited,
            outcome.stop
        );

        self.transition(PaginationState::Done);
        outcome
    }

    /// Rejects pages whose items break the adapter contract.
    fn check_contract(&self, items: Vec<Item>) -> Result<Vec<Item>, FetchError> {
        let tag = &self.config.tag;
        if let Some(bad) = items.iter().find(|i| &i.source != tag || i.id.is_empty()) {
            return Err(FetchError::Permanent(format!(
                "{tag}: adapter produced item '{}' tagged '{}'",
                bad.id, bad.source
            )));
        }
        Ok(items)
    }

    fn transition(&mut self, next: PaginationState) {
        log::trace!("{}: {} -> {next}", self.config.tag, self.state);
        self.state = next;
    }
}
