//! HTTP fetch primitive backed by reqwest

use crate::fetcher::traits::Fetcher;
use crate::utils::error::{FetchError, PrefetchError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// HTTP fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,      // Per-request timeout
    pub retry_attempts: usize,  // Extra attempts for retryable failures
    pub retry_delay: Duration,  // Delay between retries
    pub user_agent: String,     // User agent header
    pub verify_images: bool,    // Reject bodies that are not a known image format
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_attempts: 2,
            retry_delay: Duration::from_millis(500),
            user_agent: format!("fastprefetch/{}", env!("CARGO_PKG_VERSION")),
            verify_images: false,
        }
    }
}

/// Fetcher that downloads image bodies over HTTP
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create new HTTP fetcher with configuration
    pub fn new(config: FetchConfig) -> Result<Self, PrefetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Single attempt to fetch a URL
    async fn fetch_attempt(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        validate_body(body, self.config.verify_images)
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.config.timeout.as_secs())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut attempts = 0;

        loop {
            match self.fetch_attempt(url).await {
                Ok(body) => {
                    debug!("Fetched {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(e) if e.is_retryable() && attempts < self.config.retry_attempts => {
                    warn!("Fetch of {} failed (attempt {}): {}", url, attempts + 1, e);
                    sleep(self.config.retry_delay).await;
                    attempts += 1;
                }
                Err(e) => {
                    error!("Fetch of {} failed after {} attempts: {}", url, attempts + 1, e);
                    return Err(e);
                }
            }
        }
    }
}

/// Check a fetched body before handing it back to the queue
fn validate_body(body: Bytes, verify_images: bool) -> Result<Bytes, FetchError> {
    if body.is_empty() {
        return Err(FetchError::Decode("empty body".to_string()));
    }
    if verify_images {
        image::guess_format(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
    }
    Ok(body)
}
