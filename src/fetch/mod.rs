//! Page retrieval.
//!
//! Listing pages are client-rendered and go through [`BrowserFetcher`] by
//! default; film detail pages are served as plain HTML and go through
//! [`HttpFetcher`].

#[cfg(feature = "browser")]
mod browser;
mod http;

#[cfg(feature = "browser")]
pub use browser::BrowserFetcher;
pub use http::HttpFetcher;

use crate::config::{FetchBackend, FetchConfig};
use crate::error::{ConfigError, FetchError};

/// One page to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    /// CSS selector that must match before the page counts as rendered.
    pub wait_for: Option<String>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            wait_for: None,
        }
    }

    pub fn waiting_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = Some(selector.into());
        self
    }
}

/// Trait implemented by every way of getting page content.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Return the rendered HTML of the requested page.
    async fn fetch(&self, request: &PageRequest) -> Result<String, FetchError>;
}

/// Build the fetcher for listing pages according to `config.backend`.
pub fn listing_fetcher(config: &FetchConfig) -> Result<Box<dyn PageFetcher>, ConfigError> {
    match config.backend {
        FetchBackend::Http => Ok(Box::new(HttpFetcher::new(config)?)),
        #[cfg(feature = "browser")]
        FetchBackend::Browser => Ok(Box::new(BrowserFetcher::new(config))),
        #[cfg(not(feature = "browser"))]
        FetchBackend::Browser => Err(ConfigError::Invalid(
            "fetch.backend = \"browser\" needs the `browser` feature; rebuild with it or use \"http\""
                .to_string(),
        )),
    }
}

/// Whether `html` contains an element matching `selector`.
pub(crate) fn contains_element(html: &str, selector: &str) -> Result<bool, String> {
    let selector = scraper::Selector::parse(selector).map_err(|e| e.to_string())?;
    let document = scraper::Html::parse_document(html);
    Ok(document.select(&selector).next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_listing_container() {
        let html = r#"<div class="card eventCard film"><p class="card__title">A</p></div>"#;
        assert_eq!(contains_element(html, "div.card.eventCard.film"), Ok(true));
        assert_eq!(contains_element("<p>nothing</p>", "div.card"), Ok(false));
        assert!(contains_element("<p></p>", "div[").is_err());
    }

    #[test]
    fn request_builder() {
        let request = PageRequest::new("https://example.com").waiting_for("div.film");
        assert_eq!(request.url, "https://example.com");
        assert_eq!(request.wait_for.as_deref(), Some("div.film"));
    }
}
