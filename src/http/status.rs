//! Classification of HTTP failures.
//!
//! Nothing here is retried: every failure is terminal for the transfer that
//! hit it, and callers decide whether to try again.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    /// HTTP 404 or 410
    #[error("Not found: {0}")]
    NotFound(String),
    /// HTTP 401
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    /// HTTP 403
    #[error("Access forbidden: {0}")]
    Forbidden(String),
    /// Other 4xx
    #[error("Request error: {0}")]
    ClientError(String),
    /// 5xx
    #[error("Server error: {0}")]
    ServerError(String),
    /// Connect or request deadline exceeded
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl HttpFailure {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HttpFailure::NotFound(_))
    }
}

/// Map a response status to a failure. Success codes map to `None`.
pub fn classify_status(status: StatusCode) -> Option<HttpFailure> {
    match status {
        s if s.is_success() => None,
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(HttpFailure::NotFound(
            "The requested resource was not found".to_string(),
        )),
        StatusCode::UNAUTHORIZED => Some(HttpFailure::AuthenticationFailed(
            "Invalid or missing credentials".to_string(),
        )),
        StatusCode::FORBIDDEN => Some(HttpFailure::Forbidden(
            "Access to this resource is forbidden".to_string(),
        )),
        s if s.is_client_error() => Some(HttpFailure::ClientError(format!(
            "HTTP {} error",
            s.as_u16()
        ))),
        s if s.is_server_error() => Some(HttpFailure::ServerError(format!(
            "HTTP {} error",
            s.as_u16()
        ))),
        s => Some(HttpFailure::Other(format!("Unexpected HTTP status {}", s.as_u16()))),
    }
}

/// Classify a transport-level error from reqwest.
pub fn classify_error(error: &reqwest::Error) -> HttpFailure {
    if let Some(failure) = error.status().and_then(classify_status) {
        return failure;
    }
    if error.is_timeout() {
        return HttpFailure::Timeout(error.to_string());
    }
    if error.is_connect() {
        return HttpFailure::Connect(error.to_string());
    }
    HttpFailure::Other(error.to_string())
}
