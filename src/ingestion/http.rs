//! HTTP client with retry logic for external signal sources.
//!
//! Retries apply only to timeouts and retryable status codes (5xx, 408,
//! 429); other 4xx responses fail immediately. After exhaustion the last
//! failure surfaces as [`Error::FetchTimeout`] or [`Error::FetchStatus`].

use crate::error::{Error, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Default retry configuration.
pub const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 10;

/// Exponential backoff delay before the given attempt (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_SECS.saturating_mul(1u64 << (attempt.saturating_sub(1).min(16)));
    Duration::from_secs(exp.min(BACKOFF_CAP_SECS))
}

fn status_is_retryable(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// HTTP fetcher shared by all source clients.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher with the given per-request timeout.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    /// GET a URL and return the body text, retrying transient failures.
    pub async fn get_text(
        &self,
        source_system: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<String> {
        let mut last_err: Option<Error> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let response = self
                .client
                .get(url)
                .query(query)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().await.map_err(|e| {
                            Error::fetch_status(source_system, status.as_u16(), e.to_string())
                        });
                    }
                    let err = Error::fetch_status(
                        source_system,
                        status.as_u16(),
                        format!("GET {}", url),
                    );
                    if !status_is_retryable(status.as_u16()) {
                        return Err(err);
                    }
                    warn!(source = source_system, attempt, status = status.as_u16(), "retryable status");
                    last_err = Some(err);
                }
                Err(e) if e.is_timeout() => {
                    warn!(source = source_system, attempt, "fetch timeout");
                    last_err = Some(Error::fetch_timeout(source_system, attempt));
                }
                Err(e) => {
                    warn!(source = source_system, attempt, error = %e, "connection error");
                    last_err = Some(Error::fetch_status(source_system, 0, e.to_string()));
                }
            }
        }

        debug!(source = source_system, "retries exhausted");
        Err(last_err.unwrap_or_else(|| Error::fetch_timeout(source_system, MAX_ATTEMPTS)))
    }

    /// GET a URL and parse the body as JSON.
    pub async fn get_json(
        &self,
        source_system: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let body = self.get_text(source_system, url, query).await?;
        serde_json::from_str(&body).map_err(|e| {
            Error::fetch_status(source_system, 200, format!("malformed JSON body: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_caps_at_ten_seconds() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(10));
        assert_eq!(backoff_delay(30), Duration::from_secs(10));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(status_is_retryable(500));
        assert!(status_is_retryable(503));
        assert!(status_is_retryable(408));
        assert!(status_is_retryable(429));
        assert!(!status_is_retryable(404));
        assert!(!status_is_retryable(401));
    }
}
