//! HTTP plumbing shared by the built-in adapters.
//!
//! Adapters perform exactly one request per page fetch; retrying is the
//! [`RetryExecutor`](crate::RetryExecutor)'s job. What this module adds is
//! the classification of every failure into [`FetchError::Transient`] or
//! [`FetchError::Permanent`]:
//!
//! - connection failures, timeouts, and truncated bodies are transient;
//! - HTTP 429 and 5xx are transient;
//! - every other 4xx is permanent;
//! - a complete body that cannot be decoded is permanent, since fetching it
//!   again yields the same bytes.

use std::collections::BTreeMap;
use std::time::Duration;

use harvester_scraper_models::FetchError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("harvester/", env!("CARGO_PKG_VERSION"));

/// Maximum length of the response body preview included in error messages.
const BODY_PREVIEW_LEN: usize = 200;

/// Client settings shared by the HTTP-backed adapters.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Additional HTTP headers to include in requests.
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpConfig {
    /// Adds an HTTP header to include in requests.
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds a [`reqwest::Client`] with the configured headers.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Permanent`] for an invalid header or if the
    /// client cannot be constructed.
    pub fn build_client(&self) -> Result<reqwest::Client, FetchError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &self.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| FetchError::Permanent(format!("invalid header name '{key}': {e}")))?;
            let val = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                FetchError::Permanent(format!("invalid header value '{value}': {e}"))
            })?;
            header_map.insert(name, val);
        }
        reqwest::Client::builder()
            .default_headers(header_map)
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Permanent(format!("failed to build HTTP client: {e}")))
    }
}

/// Sends a GET request and returns the body as text.
///
/// # Errors
///
/// Returns a classified [`FetchError`] for transport failures and non-2xx
/// statuses.
pub async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    log::debug!("GET {url}");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_transport(url, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(url, status, &body));
    }

    response
        .text()
        .await
        .map_err(|e| FetchError::Transient(format!("{url}: body read failed: {e}")))
}

/// Sends a GET request and parses the body as JSON.
///
/// # Errors
///
/// Returns a classified [`FetchError`]; a body that is not valid JSON is
/// [`FetchError::Permanent`].
pub async fn get_json(
    client: &reqwest::Client,
    url: &str,
) -> Result<serde_json::Value, FetchError> {
    let text = get_text(client, url).await?;
    serde_json::from_str(&text).map_err(|e| {
        FetchError::Permanent(format!(
            "{url}: JSON parse failed: {e} (received {} bytes, body preview: {})",
            text.len(),
            preview(&text)
        ))
    })
}

/// Classifies a non-success HTTP status.
#[must_use]
pub fn classify_status(url: &str, status: reqwest::StatusCode, body: &str) -> FetchError {
    let message = format!("{url}: HTTP {status} {}", preview(body));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

/// Classifies a transport-level [`reqwest::Error`].
fn classify_transport(url: &str, e: &reqwest::Error) -> FetchError {
    let message = format!("{url}: {e}");
    if is_transient(e) {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    !e.is_decode() && (e.is_timeout() || e.is_connect() || e.is_body() || e.is_request())
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_owned()
    }
}
