//! Config-driven source definition.
//!
//! [`SourceDefinition`] captures everything unique about a data source in a
//! serializable config struct: its politeness and pagination limits plus a
//! [`FetcherConfig`] describing which generic adapter to build. Adding a
//! source means writing a TOML file, not code.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use harvester_scraper::SourceAdapter;
use harvester_scraper::html_list::{FieldSelector, HtmlListAdapter};
use harvester_scraper::http::HttpConfig;
use harvester_scraper::json_paginated::{JsonPaginatedAdapter, PaginationType, ResponseFormat};
use harvester_scraper_models::SourceConfig;
use serde::Deserialize;

use crate::SourceDefError;

// ── Top-level source definition ──────────────────────────────────────────

/// A complete, config-driven source definition.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    /// Unique identifier, used as the source tag (e.g., `"crates_io"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Minimum milliseconds between two requests to this source.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Extra attempts after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pagination ceiling.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Items requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Stop early once this many items have been collected.
    #[serde(default = "default_target_item_count")]
    pub target_item_count: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How to fetch pages.
    pub fetcher: FetcherConfig,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_max_pages() -> u32 {
    10
}

const fn default_page_size() -> u32 {
    50
}

const fn default_target_item_count() -> u64 {
    500
}

const fn default_timeout_secs() -> u64 {
    30
}

// ── Fetcher config ───────────────────────────────────────────────────────

/// Which adapter to build, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetcherConfig {
    /// Paginated JSON API.
    JsonPaginated {
        /// Endpoint without pagination parameters.
        url: String,
        /// `"page"` or `"offset"`.
        #[serde(default)]
        pagination: PaginationKind,
        /// Query parameter carrying the page number or offset.
        #[serde(default = "default_page_param")]
        page_param: String,
        /// Number the API uses for its first page.
        #[serde(default = "default_first_page")]
        first_page: u32,
        /// Query parameter carrying the page size, if the API takes one.
        page_size_param: Option<String>,
        /// Dot path to the record array; bare array when absent.
        data_path: Option<String>,
        /// Dot path to each record's id.
        #[serde(default = "default_id_field")]
        id_field: String,
        /// Extra request headers.
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// HTML page with one element per item.
    HtmlList {
        /// URL template; `{page}` is replaced by the page number.
        url: String,
        /// CSS selector matching one element per item.
        item_selector: String,
        /// Name of the field used as the item id.
        id_field: String,
        /// Fields to extract.
        fields: Vec<FieldDef>,
        /// Extra request headers.
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// JSON pagination flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    /// `?page=N`.
    #[default]
    Page,
    /// `?offset=N*page_size`.
    Offset,
}

/// One extracted HTML field.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    /// Payload key.
    pub name: String,
    /// CSS selector relative to the item element; empty for the element itself.
    #[serde(default)]
    pub selector: String,
    /// Attribute to read instead of text.
    pub attribute: Option<String>,
}

fn default_page_param() -> String {
    "page".to_owned()
}

const fn default_first_page() -> u32 {
    1
}

fn default_id_field() -> String {
    "id".to_owned()
}

impl SourceDefinition {
    /// Returns the unique source identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the base URL regardless of fetcher type.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.fetcher {
            FetcherConfig::JsonPaginated { url, .. } | FetcherConfig::HtmlList { url, .. } => url,
        }
    }

    /// Returns the fetcher type name.
    #[must_use]
    pub const fn strategy(&self) -> &'static str {
        match &self.fetcher {
            FetcherConfig::JsonPaginated { .. } => "json_paginated",
            FetcherConfig::HtmlList { .. } => "html_list",
        }
    }

    /// Builds the engine-facing configuration.
    #[must_use]
    pub fn config(&self) -> SourceConfig {
        SourceConfig::new(&self.id, self.base_url())
            .with_min_interval(Duration::from_millis(self.min_interval_ms))
            .with_max_retries(self.max_retries)
            .with_max_pages(self.max_pages)
            .with_page_size(self.page_size)
            .with_target_item_count(self.target_item_count)
    }

    /// Builds the adapter described by the fetcher config.
    #[must_use]
    pub fn adapter(&self) -> Arc<dyn SourceAdapter> {
        match &self.fetcher {
            FetcherConfig::JsonPaginated {
                url,
                pagination,
                page_param,
                first_page,
                page_size_param,
                data_path,
                id_field,
                headers,
            } => {
                let pagination = match pagination {
                    PaginationKind::Page => PaginationType::Page {
                        param: page_param.clone(),
                        first_page: *first_page,
                    },
                    PaginationKind::Offset => PaginationType::Offset {
                        param: page_param.clone(),
                    },
                };
                let response_format = data_path.as_ref().map_or(ResponseFormat::BareArray, |p| {
                    ResponseFormat::Wrapped {
                        data_path: p.clone(),
                    }
                });
                let http = self.http(
                    [("Accept", "application/json")]
                        .into_iter()
                        .chain(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
                );

                let mut adapter = JsonPaginatedAdapter::new(&self.id, url)
                    .with_pagination(pagination)
                    .with_response_format(response_format)
                    .with_page_size(self.page_size)
                    .with_id_field(id_field)
                    .with_http(http);
                if let Some(param) = page_size_param {
                    adapter = adapter.with_page_size_param(param);
                }
                Arc::new(adapter)
            }
            FetcherConfig::HtmlList {
                url,
                item_selector,
                id_field,
                fields,
                headers,
            } => {
                let adapter = fields.iter().fold(
                    HtmlListAdapter::new(&self.id, url, item_selector, id_field)
                        .with_http(
                            self.http(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
                        ),
                    |adapter, field| {
                        adapter.with_field(FieldSelector {
                            name: field.name.clone(),
                            selector: field.selector.clone(),
                            attribute: field.attribute.clone(),
                        })
                    },
                );
                Arc::new(adapter)
            }
        }
    }

    /// Client settings; later headers override earlier ones.
    fn http<'h>(&self, headers: impl IntoIterator<Item = (&'h str, &'h str)>) -> HttpConfig {
        headers.into_iter().fold(
            HttpConfig::default().with_timeout(Duration::from_secs(self.timeout_secs)),
            |http, (key, value)| http.with_header(key, value),
        )
    }
}

/// Parses a TOML string into a [`SourceDefinition`].
///
/// # Errors
///
/// Returns [`SourceDefError::Toml`] if the TOML is malformed.
pub fn parse_source_toml(toml_str: &str) -> Result<SourceDefinition, SourceDefError> {
    Ok(toml::de::from_str(toml_str)?)
}
