use std::time::Duration;

use reqwest::header::InvalidHeaderValue;
use reqwest::StatusCode;
use thiserror::Error;

/// Failure reaching the remote service at all.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized - session expired or credentials rejected")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 422 => ApiError::BadRequest(truncated),
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            409 => ApiError::Conflict(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True for a network-level failure rather than a server response.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}
