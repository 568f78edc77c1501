use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use interfaces::{FeedError, MediaError, MediaSource};
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::types::Result;

/// Why a single GET failed, before it is mapped to a collaborator error.
#[derive(Debug)]
pub enum FetchFailure {
    Http(String),
    Status(u16),
    TooLarge(usize),
}

impl FetchFailure {
    fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Http(_) => true,
            FetchFailure::Status(status) => *status == 429 || *status >= 500,
            FetchFailure::TooLarge(_) => false,
        }
    }
}

impl From<FetchFailure> for FeedError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Http(message) => FeedError::Http(message),
            FetchFailure::Status(status) => FeedError::Status { status },
            FetchFailure::TooLarge(size_mb) => FeedError::TooLarge { size_mb },
        }
    }
}

impl From<FetchFailure> for MediaError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Http(message) => MediaError::Http(message),
            FetchFailure::Status(status) => MediaError::Status { status },
            FetchFailure::TooLarge(size_mb) => MediaError::TooLarge { size_mb },
        }
    }
}

/// Plain HTTP GETs with retries, a body size cap and a per-host minimum
/// interval.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(redirect)
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch a feed document as text.
    pub async fn fetch_text(&self, url: &str) -> std::result::Result<String, FetchFailure> {
        let body = self.fetch_bytes(url).await?;
        let text = String::from_utf8_lossy(&body).into_owned();
        info!(url, bytes = text.len(), "Fetched feed");
        Ok(text)
    }

    pub async fn fetch_bytes(&self, url: &str) -> std::result::Result<Vec<u8>, FetchFailure> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            self.apply_rate_limit(url).await;

            let failure = match self.client.get(url).send().await {
                Ok(response) => match self.read_body(response).await {
                    Ok(body) => return Ok(body),
                    Err(failure) => failure,
                },
                Err(e) => FetchFailure::Http(e.to_string()),
            };

            if failure.is_retryable() && attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!(url, attempt = attempt + 1, ?delay, ?failure, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
            }

            error!(url, attempts = attempt + 1, ?failure, "Fetch failed");
            return Err(failure);
        }
    }

    async fn read_body(&self, response: Response) -> std::result::Result<Vec<u8>, FetchFailure> {
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let limit = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit {
                return Err(FetchFailure::TooLarge(content_length as usize / (1024 * 1024)));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::Http(e.to_string()))?;
        if body.len() > limit {
            return Err(FetchFailure::TooLarge(body.len() / (1024 * 1024)));
        }
        Ok(body.to_vec())
    }

    async fn apply_rate_limit(&self, url: &str) {
        let host = match Url::parse(url) {
            Ok(parsed) => parsed.host_str().unwrap_or("").to_string(),
            Err(_) => return,
        };
        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);

        let mut rate_limiter = self.rate_limiter.lock().await;
        if let Some(last_request) = rate_limiter.get(&host) {
            let elapsed = last_request.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!(host = %host, ?wait_time, "Rate limiting");
                tokio::time::sleep(wait_time).await;
            }
        }
        rate_limiter.insert(host, Instant::now());
    }
}

#[async_trait]
impl MediaSource for Fetcher {
    async fn fetch_media(&self, url: &str) -> std::result::Result<Vec<u8>, MediaError> {
        Ok(self.fetch_bytes(url).await?)
    }
}
