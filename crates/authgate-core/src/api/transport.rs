//! The HTTP transport boundary.
//!
//! The gateway only needs "send this request, give me status and body".
//! `ReqwestTransport` is the production implementation; tests script their
//! own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::{ApiError, TransportError};

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A fully built outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// Status and raw body of a response, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Ok for 2xx, otherwise the matching `ApiError`.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    /// Decode a 2xx body as JSON.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let response = self.error_for_status()?;
        serde_json::from_str(&response.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response body: {}", e)))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<ApiResponse, TransportError>;
}

/// Transport over a pooled `reqwest::Client`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client, sharing its connection pool.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<ApiResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}
