//! Adapters for third-party HTTP providers.
//!
//! Every adapter goes through [`HttpClient`], which applies connect/request
//! timeouts and retries idempotent requests on transient failures.

pub mod email;
pub mod eventbrite;
pub mod gemini;
pub mod godaddy;
pub mod whatsapp;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProvidersConfig;

pub use email::{EmailProvider, LogEmailProvider, OutboundEmail, ResendEmailProvider, SentMessage};
pub use eventbrite::EventbriteClient;
pub use gemini::GeminiClient;
pub use godaddy::{DnsRecord, GoDaddyClient};
pub use whatsapp::{DialogWhatsAppProvider, LogWhatsAppProvider, MediaBlob, WhatsAppProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with a non-success status.
    #[error("provider API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        details: Value,
    },

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider parse error: {0}")]
    Parse(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.min(16))
    }
}

/// Statuses worth retrying: rate limiting and gateway hiccups.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(
        connect_timeout: Duration,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let inner = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(concat!("kyozo/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { inner, retry })
    }

    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        Self::new(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(250),
            },
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.inner.post(url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.inner.put(url)
    }

    /// Send a request. Only `idempotent` requests are retried; a POST that is
    /// not guarded by an idempotency key is sent exactly once.
    pub async fn execute(
        &self,
        request: RequestBuilder,
        idempotent: bool,
    ) -> Result<Response, ProviderError> {
        let max_retries = if idempotent { self.retry.max_retries } else { 0 };
        let mut attempt = 0;

        loop {
            let this_try = request
                .try_clone()
                .ok_or_else(|| ProviderError::Transport("request body is not cloneable".into()))?;

            match this_try.send().await {
                Ok(response) if is_transient_status(response.status()) && attempt < max_retries => {
                    tracing::warn!(
                        status = response.status().as_u16(),
                        attempt,
                        "Transient provider status, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < max_retries => {
                    tracing::warn!(attempt, "Provider request failed, retrying: {}", e);
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }
}

/// Turn a provider response into `T`, or into `ProviderError::Api` carrying the
/// provider's status and error body.
pub async fn json_or_error<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        return Err(api_error(status, &body));
    }

    serde_json::from_slice(&body).map_err(|e| ProviderError::Parse(e.to_string()))
}

pub fn api_error(status: StatusCode, body: &[u8]) -> ProviderError {
    let details: Value = serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
    let message = extract_message(&details).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Provider request failed")
            .to_string()
    });

    ProviderError::Api {
        status: status.as_u16(),
        message,
        details,
    }
}

/// Providers disagree on where the human-readable message lives.
fn extract_message(details: &Value) -> Option<String> {
    let candidates = [
        details.get("message"),
        details.get("error_description"),
        details.pointer("/error/message"),
        details.get("error").filter(|v| v.is_string()),
        details.pointer("/meta/developer_message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn api_error_reads_nested_messages() {
        let body = json!({"error": {"message": "API key not valid", "code": 400}});
        match api_error(StatusCode::BAD_REQUEST, body.to_string().as_bytes()) {
            ProviderError::Api {
                status, message, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn api_error_falls_back_to_reason_for_plain_bodies() {
        match api_error(StatusCode::UNAUTHORIZED, b"nope") {
            ProviderError::Api {
                message, details, ..
            } => {
                assert_eq!(message, "Unauthorized");
                assert_eq!(details, json!("nope"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_idempotent_request_is_sent_once_on_transport_failure() {
        let client = HttpClient::new(
            Duration::from_millis(200),
            Duration::from_millis(500),
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(30),
            },
        )
        .unwrap();

        // Port 9 on loopback refuses connections; a retry would sleep 30s.
        let started = std::time::Instant::now();
        let result = client.execute(client.post("http://127.0.0.1:9/"), false).await;
        assert!(matches!(result, Err(ProviderError::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
