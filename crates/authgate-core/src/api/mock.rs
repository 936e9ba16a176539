//! Scripted transport for tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};

use super::error::TransportError;
use super::transport::{ApiResponse, Transport, TransportRequest};

pub(crate) const BASE_URL: &str = "http://auth.test/api";

pub(crate) enum Reply {
    Status(StatusCode, String),
    Delayed(Duration, StatusCode, String),
    Fail,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Status(StatusCode::OK, body.into())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Reply::Status(
            StatusCode::from_u16(status).expect("valid status code"),
            body.into(),
        )
    }
}

type Handler = Box<dyn Fn(&TransportRequest) -> Reply + Send + Sync>;

/// Records every request and answers from a handler closure.
pub(crate) struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&TransportRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|r| r.method == method && path_of(r) == path)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        match (self.handler)(&request) {
            Reply::Status(status, body) => Ok(ApiResponse::new(status, body)),
            Reply::Delayed(delay, status, body) => {
                tokio::time::sleep(delay).await;
                Ok(ApiResponse::new(status, body))
            }
            Reply::Fail => Err(TransportError::Connection("connection refused".to_string())),
        }
    }
}

pub(crate) fn path_of(request: &TransportRequest) -> &str {
    request.url.strip_prefix(BASE_URL).unwrap_or(&request.url)
}

pub(crate) fn bearer(request: &TransportRequest) -> Option<&str> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

pub(crate) fn user_json(id: &str, name: &str) -> String {
    serde_json::json!({
        "id": id,
        "email": format!("{}@example.com", id),
        "name": name,
        "role": "member",
    })
    .to_string()
}

pub(crate) fn auth_json(access: &str, refresh: &str) -> String {
    format!(
        r#"{{"user":{},"accessToken":"{}","refreshToken":"{}"}}"#,
        user_json("u-1", "Ada"),
        access,
        refresh
    )
}
