//! Generic paginated JSON API adapter.
//!
//! Handles APIs that return JSON arrays or wrapped objects with pagination via
//! page number or offset parameters. Each record becomes an [`Item`] whose id
//! is read from a configured field.

use std::fmt::Write as _;

use async_trait::async_trait;
use harvester_scraper_models::{FetchError, FetchResult, Item};

use crate::SourceAdapter;
use crate::http::{self, HttpConfig};

/// The pagination strategy used by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationType {
    /// Offset-based pagination (e.g. `?offset=100`).
    Offset {
        /// Query parameter name for the offset value.
        param: String,
    },
    /// Page-number-based pagination (e.g. `?page=2`).
    Page {
        /// Query parameter name for the page number.
        param: String,
        /// Number the API uses for its first page (usually 0 or 1).
        first_page: u32,
    },
}

/// Describes how the JSON response body is structured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFormat {
    /// The response is a bare JSON array of records.
    BareArray,
    /// The records are nested inside an object at the given path.
    Wrapped {
        /// Dot-separated path to the data array (e.g. `"results"` or
        /// `"data.items"`).
        data_path: String,
    },
}

/// Adapter for paginated JSON APIs.
#[derive(Debug, Clone)]
pub struct JsonPaginatedAdapter {
    /// Tag stamped on every produced item.
    source: String,
    /// Endpoint without pagination parameters.
    url: String,
    /// Records requested per page.
    page_size: u32,
    /// Client settings.
    http: HttpConfig,
    /// The pagination strategy to use.
    pagination: PaginationType,
    /// How to extract records from the JSON response.
    response_format: ResponseFormat,
    /// Optional query parameter name for the page size.
    page_size_param: Option<String>,
    /// Dot-separated path to each record's identifier.
    id_field: String,
}

impl JsonPaginatedAdapter {
    /// Creates an adapter with sensible defaults: `?page=` numbering starting
    /// at 1, bare array responses, 100 records per page, and ids read from
    /// the `id` field.
    #[must_use]
    pub fn new(source: &str, url: &str) -> Self {
        Self {
            source: source.to_owned(),
            url: url.to_owned(),
            page_size: 100,
            http: HttpConfig::default().with_header("Accept", "application/json"),
            pagination: PaginationType::Page {
                param: "page".to_owned(),
                first_page: 1,
            },
            response_format: ResponseFormat::BareArray,
            page_size_param: None,
            id_field: "id".to_owned(),
        }
    }

    /// Sets the pagination strategy.
    #[must_use]
    pub fn with_pagination(mut self, pagination: PaginationType) -> Self {
        self.pagination = pagination;
        self
    }

    /// Sets the response format.
    #[must_use]
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Sets the query parameter name used to communicate page size.
    #[must_use]
    pub fn with_page_size_param(mut self, param: &str) -> Self {
        self.page_size_param = Some(param.to_owned());
        self
    }

    /// Sets the page size (number of records per page).
    #[must_use]
    pub const fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the path of the identifier field within each record.
    #[must_use]
    pub fn with_id_field(mut self, field: &str) -> Self {
        field.clone_into(&mut self.id_field);
        self
    }

    /// Replaces the client settings.
    #[must_use]
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Builds the full request URL for the given 1-based page number.
    #[must_use]
    pub fn build_url(&self, page: u32) -> String {
        let index = page.saturating_sub(1);
        let mut url = self.url.clone();

        let separator = if url.contains('?') { '&' } else { '?' };
        let mut first = true;

        let mut append = |key: &str, value: &str| {
            let sep = if first { separator } else { '&' };
            first = false;
            let _ = write!(url, "{sep}{key}={value}");
        };

        match &self.pagination {
            PaginationType::Offset { param } => {
                let offset = u64::from(index) * u64::from(self.page_size);
                append(param, &offset.to_string());
            }
            PaginationType::Page { param, first_page } => {
                append(param, &(first_page + index).to_string());
            }
        }

        if let Some(ref size_param) = self.page_size_param {
            append(size_param, &self.page_size.to_string());
        }

        url
    }

    /// Navigates a dot-separated path into a [`serde_json::Value`].
    fn resolve_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
        let mut current = value;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Extracts the record array from a JSON response body according to the
    /// configured [`ResponseFormat`].
    fn extract_records(&self, body: serde_json::Value) -> Result<Vec<serde_json::Value>, FetchError> {
        let array_value = match &self.response_format {
            ResponseFormat::BareArray => body,
            ResponseFormat::Wrapped { data_path } => Self::resolve_path(&body, data_path)
                .cloned()
                .ok_or_else(|| {
                    FetchError::Permanent(format!("response does not contain path '{data_path}'"))
                })?,
        };

        match array_value {
            serde_json::Value::Array(records) => Ok(records),
            _ => Err(FetchError::Permanent(
                "expected JSON array of records".to_owned(),
            )),
        }
    }

    /// Turns one record into an [`Item`], reading its id.
    fn to_item(&self, record: serde_json::Value) -> Result<Item, FetchError> {
        let id = match Self::resolve_path(&record, &self.id_field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(FetchError::Permanent(format!(
                    "{}: record has no usable '{}' field",
                    self.source, self.id_field
                )));
            }
        };
        Ok(Item::new(&self.source, id, record))
    }
}

#[async_trait]
impl SourceAdapter for JsonPaginatedAdapter {
    async fn fetch_page(&self, page: u32) -> FetchResult {
        let client = self.http.build_client()?;
        let url = self.build_url(page);

        log::debug!("{}: fetching JSON page {page}: {url}", self.source);

        let body = http::get_json(&client, &url).await?;
        let records = self.extract_records(body)?;
        let count = records.len();

        let items = records
            .into_iter()
            .map(|record| self.to_item(record))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("{}: page {page}: {count} records", self.source);
        Ok(items)
    }

    fn strategy(&self) -> &str {
        "json_paginated"
    }
}
