//! Outbound transport for live tool calls.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::redirect::Policy;
use serde_json::Value;
use url::Url;

use crate::safety::redact_text;

/// A 2xx response. A 3xx is reported as [`TransportError::Status`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("request failed: {0}")]
    Request(String),

    #[error("endpoint returned status {code}")]
    Status { code: u16, body: Value },
}

/// Sends one JSON POST. Implementations must not retry; the invoker owns
/// retries, backoff and the breaker.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn post(
        &self,
        url: &Url,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// Release pooled resources. Must be idempotent.
    fn close(&self) {}
}

/// `reqwest`-backed transport with a lazily created, shared client.
#[derive(Debug)]
pub struct HttpTransport {
    client: Mutex<Option<reqwest::Client>>,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            client: Mutex::new(None),
            user_agent: user_agent.into(),
        }
    }

    /// Whether a pooled client currently exists.
    pub fn has_client(&self) -> bool {
        self.client.lock().is_some()
    }

    fn client(&self) -> Result<reqwest::Client, TransportError> {
        let mut guard = self.client.lock();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        // Redirects are never followed: only the validated endpoint is contacted.
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(concat!("toolgate/", env!("CARGO_PKG_VERSION")))
    }
}

/// JSON when possible, otherwise the raw text; `Null` for an empty body.
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn post(
        &self,
        url: &Url,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.client()?;
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                TransportError::Request(redact_text(&e.without_url().to_string()))
            }
        };

        let response = client
            .post(url.clone())
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_err)?;
        let body = parse_body(&bytes);

        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
                body,
            });
        }
        Ok(TransportResponse {
            status: status.as_u16(),
            body,
        })
    }

    fn close(&self) {
        self.client.lock().take();
    }
}
