use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

use crate::config::FetchSettings;
use crate::error::{Error, Result};

/// Source of page image bytes.
pub trait ImageFetcher: Send + Sync + 'static {
    fn fetch_image(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// HTTP fetcher with bounded retries on rate limiting and server errors.
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

enum Attempt {
    Retry(String),
    Fatal(String),
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("issue_ranges/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::fetch("http client", e))?;
        Ok(Self { client, settings })
    }

    pub async fn fetch_manifest(&self, url: &str) -> Result<Vec<u8>> {
        self.get_with_retry(url, self.settings.manifest_timeout).await
    }

    async fn get_with_retry(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let max = self.settings.max_retries;
        let mut attempt = 0;
        loop {
            match self.get_once(url, timeout).await {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Fatal(reason)) => return Err(Error::fetch(url, reason)),
                Err(Attempt::Retry(reason)) if attempt >= max => {
                    return Err(Error::fetch(url, reason));
                }
                Err(Attempt::Retry(reason)) => {
                    let wait = backoff(self.settings.base_backoff, attempt);
                    warn!(
                        "{} for {} (attempt {}/{}), backing off {:.1}s",
                        reason,
                        url,
                        attempt + 1,
                        max,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn get_once(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, Attempt> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Attempt::Retry(e.to_string())
                } else {
                    Attempt::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {}", status);
            return Err(if is_retryable(status) {
                Attempt::Retry(reason)
            } else {
                Attempt::Fatal(reason)
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Attempt::Retry(e.to_string()))
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch_image(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send {
        self.get_with_retry(url, self.settings.image_timeout)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt)
}
