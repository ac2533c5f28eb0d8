//! Transport layer
//!
//! Sends composed [`IdxRequest`]s and hands back the status and JSON body. The
//! transport knows nothing about remediations; classifying responses is the
//! orchestrator's job.

use crate::builders::{IdxRequest, RequestBody, FORM_URLENCODED, ION_JSON};
use crate::config::TransportSettings;
use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Header carrying the device token
pub const DEVICE_TOKEN_HEADER: &str = "X-Device-Token";

/// Status and parsed body of a response
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status
    pub status: u16,
    /// JSON body (`Null` when the body was empty)
    pub body: Value,
}

impl RawResponse {
    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 4xx
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Sends requests to the authorization server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request
    async fn send(&self, request: &IdxRequest) -> Result<RawResponse, TransportError>;
}

/// Retry behaviour for connection failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// First delay, doubled per attempt
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * (1u32 << attempt.saturating_sub(1).min(4))
    }
}

/// reqwest-backed transport with a cookie store
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Build a transport from settings
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let user_agent = settings
            .user_agent
            .clone()
            .unwrap_or_else(|| crate::USER_AGENT.to_string());

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                initial_backoff: settings.retry_backoff,
            },
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, request: &IdxRequest) -> Result<RawResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::Request(format!("invalid method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.url);
        builder = match &request.body {
            RequestBody::Json(body) => builder
                .header(reqwest::header::CONTENT_TYPE, ION_JSON)
                .header(reqwest::header::ACCEPT, ION_JSON)
                .body(body.to_string()),
            RequestBody::Form(pairs) => builder
                .header(reqwest::header::CONTENT_TYPE, FORM_URLENCODED)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(pairs),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        Ok(RawResponse {
            status,
            body: parse_body(&request.url, &bytes)?,
        })
    }
}

/// Parse a response body; empty bodies become `Null`
pub fn parse_body(url: &str, bytes: &[u8]) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| TransportError::MalformedBody {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &IdxRequest) -> Result<RawResponse, TransportError> {
        debug!(body = %request.log_view(), "sending request");
        let mut attempt = 0u32;

        loop {
            match self.send_once(request).await {
                Ok(response) => {
                    debug!(status = response.status, "received response");
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "Request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.retry.max_retries, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
