#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Periodic re-execution of orchestrator runs.
//!
//! [`Scheduler::start`] runs immediately and then once per interval. At most
//! one run is active at a time: a tick that arrives mid-run is dropped and
//! reported as [`SchedulerEvent::TickSkipped`]. Every completed run is
//! written through to the [`SnapshotStore`] unless every source failed
//! without fetching anything.

pub mod event;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use harvester_orchestrator::BatchOrchestrator;
use harvester_snapshot::SnapshotStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use event::{SchedulerCounters, SchedulerEvent, SchedulerStats};

const EVENT_CAPACITY: usize = 64;

/// Reasons a scheduler cannot start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The interval between runs must be positive.
    #[error("scheduler interval must be greater than zero")]
    ZeroInterval,
}

/// Builds scheduled runs from an orchestrator and a snapshot store.
#[derive(Clone)]
pub struct Scheduler {
    orchestrator: Arc<BatchOrchestrator>,
    store: Arc<dyn SnapshotStore>,
}

impl Scheduler {
    /// Creates a scheduler writing through to `store`.
    #[must_use]
    pub fn new(orchestrator: Arc<BatchOrchestrator>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    /// Starts ticking. The first run begins immediately, before this
    /// returns, so a [`SchedulerHandle::stop`] right after still commits it.
    ///
    /// `sources` restricts runs to the given tags; `None` runs every
    /// registered source.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ZeroInterval`] if `interval` is zero.
    pub fn start(
        &self,
        interval: Duration,
        sources: Option<Vec<String>>,
    ) -> Result<SchedulerHandle, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            orchestrator: Arc::clone(&self.orchestrator),
            store: Arc::clone(&self.store),
            sources,
            interval,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            current_run: Mutex::new(None),
            active: Mutex::new(None),
            run_counter: AtomicU64::new(0),
            events,
            stats: SchedulerStats::default(),
        });
        let stop = CancellationToken::new();

        log::info!("Scheduler started (interval={interval:?})");
        begin_run(&shared);
        let ticker = tokio::spawn(tick_loop(Arc::clone(&shared), stop.clone()));

        Ok(SchedulerHandle {
            shared,
            stop,
            ticker: Some(ticker),
        })
    }
}

struct Shared {
    orchestrator: Arc<BatchOrchestrator>,
    store: Arc<dyn SnapshotStore>,
    sources: Option<Vec<String>>,
    interval: Duration,
    running: AtomicBool,
    stopping: AtomicBool,
    current_run: Mutex<Option<CancellationToken>>,
    active: Mutex<Option<JoinHandle<()>>>,
    run_counter: AtomicU64,
    events: broadcast::Sender<SchedulerEvent>,
    stats: SchedulerStats,
}

impl Shared {
    fn emit(&self, event: SchedulerEvent) {
        log::trace!("Scheduler event: {}", event.as_ref());
        self.stats.record(&event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn next_run_at(&self) -> Option<DateTime<Utc>> {
        if self.stopping.load(Ordering::Acquire) {
            return None;
        }
        TimeDelta::from_std(self.interval)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
    }
}

/// Clears the active-run state when a run ends, even by panic.
struct RunGuard(Arc<Shared>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.0.running.store(false, Ordering::Release);
    }
}

/// Spawns a run unless one is already active.
fn begin_run(shared: &Arc<Shared>) {
    if shared.running.swap(true, Ordering::AcqRel) {
        log::info!("Previous run still active, skipping tick");
        shared.emit(SchedulerEvent::TickSkipped);
        return;
    }

    let run_cancel = CancellationToken::new();
    *shared
        .current_run
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(run_cancel.clone());

    let handle = tokio::spawn(supervise(Arc::clone(shared), run_cancel));
    *shared.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
}

/// Ticks from one interval after start; the first run is begun by
/// [`Scheduler::start`].
async fn tick_loop(shared: Arc<Shared>, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + shared.interval, shared.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        begin_run(&shared);
    }

    log::debug!("Scheduler ticker stopped");
}

/// Runs one scheduled run in its own task so a panic only ends that run.
async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let task = tokio::spawn(run_once(Arc::clone(&shared), cancel));
    if let Err(e) = task.await {
        let run = shared.run_counter.load(Ordering::Relaxed);
        log::error!("Scheduled run {run} ended abnormally: {e}");
        shared.emit(SchedulerEvent::RunFailed {
            run,
            error: e.to_string(),
        });
    }
}

async fn run_once(shared: Arc<Shared>, cancel: CancellationToken) {
    let _guard = RunGuard(Arc::clone(&shared));
    let run = shared.run_counter.fetch_add(1, Ordering::Relaxed) + 1;

    log::info!("Scheduled run {run} starting");
    shared.emit(SchedulerEvent::RunStarted { run });

    let result = match &shared.sources {
        Some(tags) => shared.orchestrator.run_sources(tags, &cancel).await,
        None => shared.orchestrator.run(&cancel).await,
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("Scheduled run {run} failed: {e}");
            shared.emit(SchedulerEvent::RunFailed {
                run,
                error: e.to_string(),
            });
            return;
        }
    };

    let report = Arc::new(outcome.report);
    let committed = if report.all_failed() && outcome.items.is_empty() {
        log::warn!("Scheduled run {run}: every source failed, keeping previous snapshot");
        false
    } else {
        match shared
            .store
            .put(outcome.items, report.completed_at, shared.next_run_at())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                log::error!("Scheduled run {run}: snapshot commit rejected: {e}");
                shared.emit(SchedulerEvent::CommitRejected {
                    run,
                    error: e.to_string(),
                });
                false
            }
        }
    };

    log::info!(
        "Scheduled run {run} finished: {} items, {} failed sources",
        report.total_items,
        report.failed_count()
    );
    shared.emit(SchedulerEvent::RunCompleted {
        run,
        report,
        committed,
    });
}

/// Controls a started scheduler.
///
/// Dropping the handle stops future ticks without waiting for an active run;
/// use [`SchedulerHandle::stop`] to wait for it.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    stop: CancellationToken,
    ticker: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Subscribes to scheduler events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Current counters.
    #[must_use]
    pub fn counters(&self) -> SchedulerCounters {
        self.shared.stats.counters()
    }

    /// Whether a run is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The store runs are committed to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.shared.store
    }

    /// Cancels the active run, if any. Items it gathered so far are still
    /// committed. Returns whether a run was active.
    pub fn cancel_current_run(&self) -> bool {
        self.canceller().cancel()
    }

    /// A detached hook for [`Self::cancel_current_run`], usable after the
    /// handle has been moved into [`Self::stop`].
    #[must_use]
    pub fn canceller(&self) -> RunCanceller {
        RunCanceller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stops future ticks and waits for an active run to finish and commit.
    pub async fn stop(mut self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.stop.cancel();

        if let Some(ticker) = self.ticker.take() {
            if let Err(e) = ticker.await {
                log::error!("Scheduler ticker ended abnormally: {e}");
            }
        }

        let active = self
            .shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = active {
            if !handle.is_finished() {
                log::info!("Waiting for active run to finish");
            }
            if let Err(e) = handle.await {
                log::error!("Scheduled run ended abnormally: {e}");
            }
        }

        log::info!("Scheduler stopped");
        self.shared.emit(SchedulerEvent::Stopped);
    }
}

/// Cancels whichever run is active when invoked.
#[derive(Clone)]
pub struct RunCanceller {
    shared: Arc<Shared>,
}

impl RunCanceller {
    /// Cancels the active run. Returns whether one was active.
    pub fn cancel(&self) -> bool {
        let current = self
            .shared
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        current.is_some_and(|token| {
            log::info!("Cancelling active run");
            token.cancel();
            true
        })
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use harvester_orchestrator::OrchestratorConfig;
    use harvester_orchestrator_models::{RunReport, Snapshot, SourceStatus};
    use harvester_scraper::{FetchError, FetchResult, Item, SourceAdapter, SourceConfig};
    use harvester_snapshot::{MemorySnapshotStore, SnapshotError};
    use harvester_source::SourceRegistry;
    use serde_json::json;

    use super::*;

    /// One item per page; `delay` before answering pages listed in `slow`.
    struct TimedAdapter {
        delay: Duration,
        slow_pages: Vec<u32>,
        pages: u32,
        fail_after_calls: Option<u32>,
        calls: AtomicU32,
        active: AtomicU32,
        peak: AtomicU32,
    }

    impl TimedAdapter {
        fn new(delay: Duration, slow_pages: Vec<u32>, pages: u32) -> Self {
            Self {
                delay,
                slow_pages,
                pages,
                fail_after_calls: None,
                calls: AtomicU32::new(0),
                active: AtomicU32::new(0),
                peak: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for TimedAdapter {
        async fn fetch_page(&self, page: u32) -> FetchResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_after_calls.is_some_and(|limit| call > limit) {
                return Err(FetchError::Permanent("gone".to_owned()));
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if self.slow_pages.contains(&page) {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if page > self.pages {
                return Ok(Vec::new());
            }
            Ok(vec![Item::new("src", format!("p{page}"), json!({ "page": page }))])
        }

        fn strategy(&self) -> &str {
            "timed"
        }
    }

    fn scheduler(adapter: Arc<TimedAdapter>) -> (Scheduler, Arc<MemorySnapshotStore>) {
        let mut registry = SourceRegistry::new();
        registry
            .register(
                SourceConfig::new("src", "https://example.com").with_max_retries(0),
                adapter,
            )
            .unwrap();
        let orchestrator = BatchOrchestrator::new(
            Arc::new(registry),
            OrchestratorConfig {
                source_start_delay_ms: 0,
                ..OrchestratorConfig::default()
            },
        );
        let store = Arc::new(MemorySnapshotStore::new());
        let scheduler = Scheduler::new(
            Arc::new(orchestrator),
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
        );
        (scheduler, store)
    }

    async fn next_completed(
        events: &mut broadcast::Receiver<SchedulerEvent>,
    ) -> (Arc<RunReport>, bool) {
        loop {
            if let SchedulerEvent::RunCompleted {
                report, committed, ..
            } = events.recv().await.unwrap()
            {
                return (report, committed);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_is_immediate() {
        let (scheduler, store) = scheduler(Arc::new(TimedAdapter::new(Duration::ZERO, vec![], 2)));
        let began = Instant::now();

        let handle = scheduler.start(Duration::from_secs(3600), None).unwrap();
        let mut events = handle.subscribe();
        let (report, committed) = next_completed(&mut events).await;

        assert!(began.elapsed() < Duration::from_secs(1));
        assert!(committed);
        assert_eq!(report.total_items, 2);
        let snapshot = store.get().unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert!(snapshot.next_run_at.is_some());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn long_runs_skip_ticks_instead_of_overlapping() {
        let adapter = Arc::new(TimedAdapter::new(Duration::from_secs(25), vec![1], 1));
        let (scheduler, _store) = scheduler(Arc::clone(&adapter));

        let handle = scheduler.start(Duration::from_secs(10), None).unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        let counters = handle.counters();
        handle.stop().await;

        // Runs start at 0, 30, 60 and 90 seconds.
        assert_eq!(counters.runs_started, 4);
        assert!(counters.ticks_skipped >= 6);
        assert!(counters.runs_started + counters.ticks_skipped <= 11);
        assert_eq!(adapter.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_keep_ticking_and_keep_last_good_snapshot() {
        let mut adapter = TimedAdapter::new(Duration::ZERO, vec![], 1);
        adapter.fail_after_calls = Some(2);
        let (scheduler, store) = scheduler(Arc::new(adapter));

        let handle = scheduler.start(Duration::from_secs(10), None).unwrap();
        let mut events = handle.subscribe();

        let (first, committed) = next_completed(&mut events).await;
        assert!(committed);
        assert_eq!(first.total_items, 1);

        let (second, committed) = next_completed(&mut events).await;
        assert!(!committed);
        assert!(second.all_failed());

        let (_, committed) = next_completed(&mut events).await;
        assert!(!committed);

        assert_eq!(store.get().unwrap().items.len(), 1);
        assert!(handle.counters().runs_started >= 3);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_active_run_and_commits_it() {
        let adapter = Arc::new(TimedAdapter::new(Duration::from_secs(10), vec![1], 1));
        let (scheduler, store) = scheduler(adapter);

        let handle = scheduler.start(Duration::from_secs(60), None).unwrap();
        let mut events = handle.subscribe();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_running());

        handle.stop().await;

        let snapshot = store.get().unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.next_run_at, None);

        let mut saw_stopped = false;
        while let Ok(event) = events.try_recv() {
            saw_stopped |= matches!(event, SchedulerEvent::Stopped);
        }
        assert!(saw_stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_commits_partial_items() {
        let adapter = Arc::new(TimedAdapter::new(Duration::from_secs(10), vec![2], 5));
        let (scheduler, store) = scheduler(Arc::clone(&adapter));

        let handle = scheduler.start(Duration::from_secs(3600), None).unwrap();
        let mut events = handle.subscribe();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(handle.cancel_current_run());
        let (report, committed) = next_completed(&mut events).await;

        assert!(committed);
        let source = report.source("src").unwrap();
        assert_eq!(source.status, SourceStatus::Cancelled);
        assert_eq!(source.items_fetched, 2);
        assert_eq!(store.get().unwrap().items.len(), 2);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
        assert!(!handle.cancel_current_run());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_rejected() {
        let (scheduler, store) = scheduler(Arc::new(TimedAdapter::new(Duration::ZERO, vec![], 1)));

        let result = scheduler.start(Duration::ZERO, None);

        assert_eq!(result.err(), Some(SchedulerError::ZeroInterval));
        assert!(store.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_right_after_start_still_commits_first_run() {
        let (scheduler, store) = scheduler(Arc::new(TimedAdapter::new(Duration::ZERO, vec![], 2)));

        let handle = scheduler.start(Duration::from_secs(3600), None).unwrap();
        handle.stop().await;

        let snapshot = store.get().unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.next_run_at, None);
    }

    /// A store whose commits blow up inside the run task.
    struct PanickingStore;

    #[async_trait]
    impl SnapshotStore for PanickingStore {
        async fn put(
            &self,
            _items: Vec<Item>,
            _completed_at: DateTime<Utc>,
            _next_run_at: Option<DateTime<Utc>>,
        ) -> Result<Arc<Snapshot>, SnapshotError> {
            panic!("disk on fire");
        }

        fn get(&self) -> Option<Arc<Snapshot>> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_run_is_reported_and_ticks_continue() {
        let (scheduler, _) = scheduler(Arc::new(TimedAdapter::new(Duration::ZERO, vec![], 1)));
        let scheduler = Scheduler::new(Arc::clone(&scheduler.orchestrator), Arc::new(PanickingStore));

        let handle = scheduler.start(Duration::from_secs(10), None).unwrap();
        let mut events = handle.subscribe();

        let mut failures = 0;
        while failures < 3 {
            if let SchedulerEvent::RunFailed { run, .. } = events.recv().await.unwrap() {
                failures += 1;
                assert_eq!(run, failures);
            }
        }

        let counters = handle.counters();
        assert_eq!(counters.runs_failed, 3);
        assert_eq!(counters.runs_completed, 0);
        assert!(counters.runs_started >= 3);
        handle.stop().await;
    }
}
