//! Bounded retry with capped exponential backoff.
//!
//! The [`RetryExecutor`] wraps any fallible async operation that reports
//! failures as [`FetchError`]. Transient failures are retried after
//! `base * 2^attempt` (never longer than `cap`); permanent failures and
//! cancellation surface immediately. Running out of attempts produces
//! [`FetchError::RetriesExhausted`] rather than a panic, so the caller always
//! gets a typed outcome.
//!
//! # Usage
//!
//! ```ignore
//! let executor = RetryExecutor::new(RetryPolicy::default());
//! let outcome = executor
//!     .run(|| adapter.fetch_page(page), config.max_retries, &cancel)
//!     .await;
//! ```

use std::future::Future;
use std::time::Duration;

use harvester_scraper_models::FetchError;
use tokio_util::sync::CancellationToken;

/// Backoff timing shared by every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    /// 2s, 4s, 8s, 16s, 32s, 32s, ...
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(32),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given base delay and cap.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay to wait after the failure of zero-indexed `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Result of a retried operation plus how much effort it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final value or classified error.
    pub result: Result<T, FetchError>,
    /// Number of times the operation was invoked.
    pub attempts: u32,
    /// Number of invocations that failed.
    pub failures: u32,
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor with the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the backoff policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Invokes `operation`, retrying transient failures up to `max_retries`
    /// additional times.
    ///
    /// `operation` is called once per attempt to build a fresh future, so
    /// any request shape can be retried.
    pub async fn run<T, F, Fut>(
        &self,
        mut operation: F,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            let result = operation().await;
            let attempts = attempt + 1;

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        failures,
                    };
                }
                Err(error) => error,
            };
            failures += 1;

            let message = match error {
                FetchError::Transient(message) => message,
                other => {
                    return RetryOutcome {
                        result: Err(other),
                        attempts,
                        failures,
                    };
                }
            };

            if attempt >= max_retries {
                log::warn!("  giving up after {attempts} attempts: {message}");
                return RetryOutcome {
                    result: Err(FetchError::RetriesExhausted {
                        attempts,
                        last: message,
                    }),
                    attempts,
                    failures,
                };
            }

            let delay = self.policy.delay_for(attempt);
            log::warn!("  transient error: {message}");
            log::warn!("  retry {attempts}/{max_retries} in {delay:?}...");

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(FetchError::Cancelled),
                        attempts,
                        failures,
                    };
                }
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
