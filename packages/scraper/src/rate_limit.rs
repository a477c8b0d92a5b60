//! Per-source request spacing.
//!
//! Each source tag gets its own slot holding the instant of the last granted
//! acquisition. Slots are independent: a caller waiting on one tag never
//! holds anything another tag needs. Callers for the same tag queue on the
//! slot's async mutex, which grants in FIFO order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use harvester_scraper_models::{FetchError, SourceConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Enforces a minimum interval between acquisitions of the same source tag.
#[derive(Debug, Default)]
pub struct RateLimiter {
    intervals: HashMap<String, Duration>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    /// Creates a limiter with no configured intervals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a limiter using each config's `min_interval`.
    #[must_use]
    pub fn from_configs<'a>(configs: impl IntoIterator<Item = &'a SourceConfig>) -> Self {
        configs.into_iter().fold(Self::new(), |limiter, config| {
            limiter.with_interval(&config.tag, config.min_interval)
        })
    }

    /// Sets the minimum interval for `tag`.
    #[must_use]
    pub fn with_interval(mut self, tag: &str, interval: Duration) -> Self {
        self.intervals.insert(tag.to_owned(), interval);
        self
    }

    /// Returns the minimum interval for `tag` (zero when unconfigured).
    #[must_use]
    pub fn min_interval(&self, tag: &str) -> Duration {
        self.intervals.get(tag).copied().unwrap_or(Duration::ZERO)
    }

    /// Waits until `tag` may issue its next request.
    pub async fn acquire(&self, tag: &str) {
        let never = CancellationToken::new();
        // Nobody else holds `never`, so this always grants.
        let _ = self.acquire_or_cancel(tag, &never).await;
    }

    /// Waits until `tag` may issue its next request, or until `cancel` fires.
    ///
    /// A cancelled wait does not count as an acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] if `cancel` fires first.
    pub async fn acquire_or_cancel(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let slot = self.slot(tag);
        let interval = self.min_interval(tag);

        let mut last = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            guard = slot.lock() => guard,
        };

        if let Some(previous) = *last {
            let ready_at = previous + interval;
            if ready_at > Instant::now() {
                log::debug!(
                    "Rate limiting {tag}: waiting {:?}",
                    ready_at - Instant::now()
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(FetchError::Cancelled),
                    () = tokio::time::sleep_until(ready_at) => {}
                }
            }
        }

        *last = Some(Instant::now());
        drop(last);
        Ok(())
    }

    fn slot(&self, tag: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(tag.to_owned()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new()
            .with_interval("a", Duration::from_millis(500))
            .with_interval("b", Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn first_acquisition_never_waits() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.acquire("a").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn same_tag_is_spaced_by_min_interval() {
        let limiter = limiter();
        let mut grants = Vec::new();
        for _ in 0..4 {
            limiter.acquire("a").await;
            grants.push(Instant::now());
        }
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn different_tags_do_not_delay_each_other() {
        let limiter = Arc::new(limiter());
        limiter.acquire("a").await;

        let waiting = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire("a").await })
        };
        tokio::task::yield_now().await;

        let start = Instant::now();
        limiter.acquire("b").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        waiting.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_on_one_tag_are_all_spaced() {
        let limiter = Arc::new(limiter());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire("a").await;
                    Instant::now()
                })
            })
            .collect();

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_tag_is_granted_immediately() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.acquire("unknown").await;
        limiter.acquire("unknown").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let limiter = limiter();
        let cancel = CancellationToken::new();
        limiter.acquire_or_cancel("a", &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = limiter.acquire_or_cancel("a", &cancel).await;
        assert_eq!(result, Err(FetchError::Cancelled));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn from_configs_reads_intervals() {
        let config = SourceConfig::new("x", "https://example.com")
            .with_min_interval(Duration::from_secs(2));
        let limiter = RateLimiter::from_configs([&config]);
        assert_eq!(limiter.min_interval("x"), Duration::from_secs(2));
        assert_eq!(limiter.min_interval("y"), Duration::ZERO);
    }
}
