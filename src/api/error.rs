//! Backend API error types

use thiserror::Error;

/// API error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Server, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Decode, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::auth(format!("Not authorized: {body}")),
            404 => Self::not_found(format!("Not found: {body}")),
            500..=599 => Self::server_error(format!("Server error: {body}")),
            _ => Self::unknown(format!("HTTP {status}: {body}")),
        }
    }

    /// Classify a transport-level failure
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::network(format!("Request timeout: {error}"))
        } else if error.is_connect() {
            Self::network(format!("Connection failed: {error}"))
        } else if error.is_decode() {
            Self::decode(format!("Failed to decode response: {error}"))
        } else {
            Self::unknown(format!("Request failed: {error}"))
        }
    }
}

/// Error classification, used for logging only: no request is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection refused, timeouts, dropped streams
    Network,
    /// Session expired or bot not visible to this user (401, 403)
    Auth,
    /// Unknown bot or prompt (404)
    NotFound,
    /// Server error (5xx)
    Server,
    /// Body did not match the expected shape
    Decode,
    Unknown,
}
