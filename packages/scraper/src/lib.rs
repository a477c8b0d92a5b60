#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Page-level scraping machinery.
//!
//! Provides the [`SourceAdapter`] trait plus everything needed to drive one
//! adapter politely across pages: a per-source [`RateLimiter`], a
//! [`RetryExecutor`] with capped exponential backoff, and the
//! [`PaginationController`] that ties them together.
//!
//! Two generic adapters ship with the crate: paginated JSON APIs
//! ([`json_paginated`]) and HTML listings ([`html_list`]).

pub mod html_list;
pub mod http;
pub mod json_paginated;
pub mod pagination;
pub mod rate_limit;
pub mod retry;

use async_trait::async_trait;

pub use harvester_scraper_models::{
    ConfigError, FetchError, FetchErrorKind, FetchResult, Item, SourceConfig,
};
pub use pagination::{PaginationController, PaginationOutcome, StopReason};
pub use rate_limit::RateLimiter;
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};

/// Fetches and parses one page of items from a single external source.
///
/// Implementations hold configuration only. Pagination state (current page,
/// items accumulated so far) lives in the [`PaginationController`], so the
/// same adapter can be driven again on the next run without reset.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetches page `page` (1-based) and returns its items.
    ///
    /// An empty vector means the source has no more data.
    async fn fetch_page(&self, page: u32) -> FetchResult;

    /// Returns the name of the scraping strategy (e.g. `"json_paginated"`).
    fn strategy(&self) -> &str;
}
