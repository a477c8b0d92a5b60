//! HTML listing adapter.
//!
//! Fetches an HTML page, selects one element per item via CSS selector, and
//! extracts named fields from each element into a [`serde_json::Value`]
//! object. One of the fields serves as the item id.

use async_trait::async_trait;
use harvester_scraper_models::{FetchError, FetchResult, Item};
use scraper::{ElementRef, Html, Selector};

use crate::SourceAdapter;
use crate::http::{self, HttpConfig};

/// Placeholder replaced by the page number in URL templates.
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// How to extract one named field from an item element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    /// Key in the produced payload.
    pub name: String,
    /// CSS selector relative to the item element. Empty selects the item
    /// element itself.
    pub selector: String,
    /// Attribute to read instead of the text content.
    pub attribute: Option<String>,
}

impl FieldSelector {
    /// Extracts the element's text content.
    #[must_use]
    pub fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_owned(),
            selector: selector.to_owned(),
            attribute: None,
        }
    }

    /// Extracts an attribute value.
    #[must_use]
    pub fn attr(name: &str, selector: &str, attribute: &str) -> Self {
        Self {
            name: name.to_owned(),
            selector: selector.to_owned(),
            attribute: Some(attribute.to_owned()),
        }
    }
}

/// Adapter that extracts items from a repeated element in an HTML page.
#[derive(Debug, Clone)]
pub struct HtmlListAdapter {
    /// Tag stamped on every produced item.
    source: String,
    /// Page URL, optionally containing [`PAGE_PLACEHOLDER`].
    url_template: String,
    /// Client settings.
    http: HttpConfig,
    /// CSS selector matching one element per item.
    item_selector: String,
    /// Name of the field used as the item id.
    id_field: String,
    /// Fields extracted from each item element.
    fields: Vec<FieldSelector>,
}

impl HtmlListAdapter {
    /// Creates an adapter for the given URL template and item selector.
    #[must_use]
    pub fn new(source: &str, url_template: &str, item_selector: &str, id_field: &str) -> Self {
        Self {
            source: source.to_owned(),
            url_template: url_template.to_owned(),
            http: HttpConfig::default(),
            item_selector: item_selector.to_owned(),
            id_field: id_field.to_owned(),
            fields: Vec::new(),
        }
    }

    /// Adds a field to extract from each item.
    #[must_use]
    pub fn with_field(mut self, field: FieldSelector) -> Self {
        self.fields.push(field);
        self
    }

    /// Replaces the client settings.
    #[must_use]
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Builds the URL for the given 1-based page number.
    ///
    /// Templates without a placeholder get a `page` query parameter for every
    /// page after the first.
    #[must_use]
    pub fn build_url(&self, page: u32) -> String {
        if self.url_template.contains(PAGE_PLACEHOLDER) {
            return self
                .url_template
                .replace(PAGE_PLACEHOLDER, &page.to_string());
        }
        if page <= 1 {
            return self.url_template.clone();
        }
        let separator = if self.url_template.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{separator}page={page}", self.url_template)
    }

    /// Parses a CSS selector string, returning a permanent error on failure.
    fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
        Selector::parse(selector)
            .map_err(|e| FetchError::Permanent(format!("invalid CSS selector '{selector}': {e}")))
    }

    /// Extracts every item from an HTML document.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Permanent`] for invalid selectors or an item
    /// without a usable id.
    pub fn parse_page(&self, body: &str) -> Result<Vec<Item>, FetchError> {
        let document = Html::parse_document(body);
        let item_sel = Self::parse_selector(&self.item_selector)?;

        let field_sels = self
            .fields
            .iter()
            .map(|field| {
                if field.selector.trim().is_empty() {
                    Ok((field, None))
                } else {
                    Self::parse_selector(&field.selector).map(|sel| (field, Some(sel)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        document
            .select(&item_sel)
            .map(|element| -> Result<Item, FetchError> {
                let mut payload = serde_json::Map::new();
                for (field, sel) in &field_sels {
                    let target = match sel {
                        Some(sel) => element.select(sel).next(),
                        None => Some(element),
                    };
                    let value = target
                        .and_then(|el| Self::extract(el, field.attribute.as_deref()))
                        .map_or(serde_json::Value::Null, serde_json::Value::String);
                    payload.insert(field.name.clone(), value);
                }

                let id = payload
                    .get(&self.id_field)
                    .and_then(serde_json::Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        FetchError::Permanent(format!(
                            "{}: item has no usable '{}' field",
                            self.source, self.id_field
                        ))
                    })?;

                Ok(Item::new(
                    &self.source,
                    id,
                    serde_json::Value::Object(payload),
                ))
            })
            .collect()
    }

    fn extract(element: ElementRef<'_>, attribute: Option<&str>) -> Option<String> {
        match attribute {
            Some(attr) => element.value().attr(attr).map(|v| v.trim().to_owned()),
            None => {
                let text = element.text().collect::<Vec<_>>().join("");
                Some(text.trim().to_owned())
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for HtmlListAdapter {
    async fn fetch_page(&self, page: u32) -> FetchResult {
        let client = self.http.build_client()?;
        let url = self.build_url(page);

        log::debug!("{}: fetching HTML page {page}: {url}", self.source);

        let body = http::get_text(&client, &url).await?;
        let items = self.parse_page(&body)?;

        log::debug!("{}: page {page}: {} items", self.source, items.len());
        Ok(items)
    }

    fn strategy(&self) -> &str {
        "html_list"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="quote" data-id="q1">
            <span class="text">To be or not to be</span>
            <small class="author">Shakespeare</small>
            <a href="/author/shakespeare">about</a>
          </div>
          <div class="quote" data-id="q2">
            <span class="text">Stay hungry</span>
            <small class="author">Jobs</small>
          </div>
        </body></html>
    "#;

    fn adapter() -> HtmlListAdapter {
        HtmlListAdapter::new("quotes", "https://quotes.example/page/{page}/", "div.quote", "id")
            .with_field(FieldSelector::attr("id", "", "data-id"))
            .with_field(FieldSelector::text("text", "span.text"))
            .with_field(FieldSelector::text("author", ".author"))
            .with_field(FieldSelector::attr("link", "a", "href"))
    }

    #[test]
    fn extracts_fields_from_each_item() {
        let items = adapter().parse_page(PAGE).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "q1");
        assert_eq!(items[0].source, "quotes");
        assert_eq!(items[0].payload["text"], "To be or not to be");
        assert_eq!(items[0].payload["link"], "/author/shakespeare");
        assert_eq!(items[1].payload["author"], "Jobs");
        assert!(items[1].payload["link"].is_null());
    }

    #[test]
    fn page_without_items_is_empty() {
        let items = adapter()
            .parse_page("<html><body>No quotes found!</body></html>")
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn item_without_id_is_permanent() {
        let html = r#"<div class="quote"><span class="text">x</span></div>"#;
        let err = adapter().parse_page(html).unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[test]
    fn invalid_selector_is_permanent() {
        let adapter = HtmlListAdapter::new("x", "https://e.com", "div[", "id");
        assert!(matches!(
            adapter.parse_page("<div></div>"),
            Err(FetchError::Permanent(_))
        ));
    }

    #[test]
    fn builds_urls_from_template_or_query() {
        assert_eq!(adapter().build_url(2), "https://quotes.example/page/2/");

        let plain = HtmlListAdapter::new("x", "https://e.com/list", "li", "id");
        assert_eq!(plain.build_url(1), "https://e.com/list");
        assert_eq!(plain.build_url(4), "https://e.com/list?page=4");
    }
}
