use std::time::Duration;

use log::debug;
use reqwest::{Client, header};

use super::{PageFetcher, PageRequest, contains_element};
use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError};

/// Fetches pages with a plain GET; no JavaScript runs.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        // Cookie store so a session cookie set by the listing survives to the detail pages.
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout: config.timeout(),
        })
    }

    fn map_error(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                waited_ms: self.timeout.as_millis(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<String, FetchError> {
        debug!("GET {}", request.url);
        let resp = self
            .client
            .get(&request.url)
            .header(header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| self.map_error(&request.url, e))?
            .error_for_status()
            .map_err(|e| self.map_error(&request.url, e))?;

        let body = resp
            .text()
            .await
            .map_err(|e| self.map_error(&request.url, e))?;

        if let Some(selector) = &request.wait_for {
            let present = contains_element(&body, selector).map_err(|reason| FetchError::Render {
                url: request.url.clone(),
                reason,
            })?;
            if !present {
                return Err(FetchError::Render {
                    url: request.url.clone(),
                    reason: format!("no element matches {selector:?}"),
                });
            }
        }

        Ok(body)
    }
}
