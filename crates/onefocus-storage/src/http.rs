//! Retrying request layer for the remote workspace API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onefocus_core::ErrorKind;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: u16) -> RetryDisposition {
    if status == 429 || (500..=599).contains(&status) {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    pub fn jittered_delay(&self, attempt_index: u32, jitter: Duration) -> Duration {
        self.delay_for_attempt(attempt_index)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// Uniform jitter in `[0, base_delay)`.
    pub fn sample_jitter(&self) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..base_ms))
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Issues exactly one request. Retry policy lives in [`RetryingClient`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.into(), request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await?;
        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status} for {method} {path}")]
    Http {
        method: HttpMethod,
        path: String,
        status: u16,
        body: JsonValue,
    },
    #[error("HTTP {status} for {method} {path} after {attempts} attempts")]
    RetriesExhausted {
        method: HttpMethod,
        path: String,
        status: u16,
        body: JsonValue,
        attempts: u32,
    },
    #[error("{method} {path} failed after {attempts} attempts: {source}")]
    Transport {
        method: HttpMethod,
        path: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("unexpected response for {path}: {message}")]
    Decode { path: String, message: String },
    #[error("{0}")]
    Precondition(String),
    #[error("pagination of {resource} exceeded {pages} pages without reaching the last page")]
    PaginationRunaway { resource: String, pages: u32 },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::RetriesExhausted { .. } | ApiError::Transport { .. } => ErrorKind::Transient,
            ApiError::Http { .. } | ApiError::Decode { .. } => ErrorKind::NonRetryable,
            ApiError::Precondition(_) | ApiError::PaginationRunaway { .. } => {
                ErrorKind::FatalPrecondition
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } | ApiError::RetriesExhausted { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Issues one logical request with exponential backoff on 429, 5xx and transport failures.
#[derive(Clone)]
pub struct RetryingClient {
    base_url: String,
    api_token: String,
    timeout: Duration,
    backoff: BackoffPolicy,
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryingClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, ApiError> {
        if config.api_token.trim().is_empty() {
            return Err(ApiError::Precondition(
                "an API token is required (CLICKUP_API_TOKEN)".to_string(),
            ));
        }
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ApiError::Precondition(format!("invalid API base url {base_url}: {e}")))?;

        Ok(Self {
            base_url,
            api_token: config.api_token,
            timeout: config.timeout,
            backoff: config.backoff,
            transport,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_reqwest(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new()
            .map_err(|e| ApiError::Precondition(format!("building http transport: {e}")))?;
        Self::new(config, Arc::new(transport))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Base + path, plus URL-encoded query pairs; `None` values are omitted.
    pub fn build_url(&self, path: &str, query: &[(&str, Option<String>)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| {
            ApiError::Precondition(format!("invalid request path {path}: {e}"))
        })?;
        let present = query
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
            .collect::<Vec<_>>();
        if !present.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in present {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, Option<String>)],
        json_body: Option<&JsonValue>,
    ) -> Result<JsonValue, ApiError> {
        let url = self.build_url(path, query)?;
        let body = json_body
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ApiError::Decode {
                path: path.to_string(),
                message: format!("serializing request body: {e}"),
            })?;

        let span = info_span!("remote_request", %method, path);
        self.send_with_retries(method, path, url, body)
            .instrument(span)
            .await
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, Option<String>)],
        json_body: Option<&JsonValue>,
    ) -> Result<T, ApiError> {
        let value = self.request(method, path, query, json_body).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn send_with_retries(
        &self,
        method: HttpMethod,
        path: &str,
        url: Url,
        body: Option<String>,
    ) -> Result<JsonValue, ApiError> {
        let max_retries = self.backoff.max_retries;
        let mut attempt = 0u32;

        loop {
            let request = TransportRequest {
                method,
                url: url.clone(),
                headers: vec![
                    (AUTHORIZATION.to_string(), self.api_token.clone()),
                    (CONTENT_TYPE.to_string(), "application/json".to_string()),
                ],
                body: body.clone(),
                timeout: self.timeout,
            };

            match self.transport.send(request).await {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    debug!(status = resp.status, attempt, "remote request succeeded");
                    return parse_success_body(path, &resp);
                }
                Ok(resp) => {
                    let body = parse_error_body(&resp);
                    match classify_status(resp.status) {
                        RetryDisposition::Retryable if attempt < max_retries => {
                            warn!(status = resp.status, attempt, "retryable status; backing off");
                        }
                        RetryDisposition::Retryable => {
                            return Err(ApiError::RetriesExhausted {
                                method,
                                path: path.to_string(),
                                status: resp.status,
                                body,
                                attempts: attempt + 1,
                            });
                        }
                        RetryDisposition::NonRetryable => {
                            return Err(ApiError::Http {
                                method,
                                path: path.to_string(),
                                status: resp.status,
                                body,
                            });
                        }
                    }
                }
                Err(err) if attempt < max_retries => {
                    warn!(error = %err, attempt, "transport failure; backing off");
                }
                Err(err) => {
                    return Err(ApiError::Transport {
                        method,
                        path: path.to_string(),
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            }

            let delay = self
                .backoff
                .jittered_delay(attempt, self.backoff.sample_jitter());
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_json(resp: &TransportResponse) -> bool {
    resp.content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("application/json"))
        && !resp.body.trim().is_empty()
}

fn parse_success_body(path: &str, resp: &TransportResponse) -> Result<JsonValue, ApiError> {
    if is_json(resp) {
        serde_json::from_str(&resp.body).map_err(|e| ApiError::Decode {
            path: path.to_string(),
            message: format!("invalid JSON body: {e}"),
        })
    } else {
        Ok(JsonValue::String(resp.body.clone()))
    }
}

fn parse_error_body(resp: &TransportResponse) -> JsonValue {
    if is_json(resp) {
        if let Ok(value) = serde_json::from_str(&resp.body) {
            return value;
        }
    }
    JsonValue::String(resp.body.clone())
}
