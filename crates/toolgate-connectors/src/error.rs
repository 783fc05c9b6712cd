//! Error types for toolgate-connectors
//!
//! Every backend-specific failure is normalized into a `ConnectorError`
//! with one of three kinds before it leaves the adapter boundary. The
//! retry controller applies policy on the kind alone and never needs to
//! know which backend produced the error.

use thiserror::Error;

/// Normalized classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Temporary condition (network glitch, 5xx, throttling); may succeed on retry
    Transient,
    /// Definitive rejection (bad request, missing resource); retrying cannot help
    Permanent,
    /// Credentials rejected; caller should invalidate cached credentials
    AuthFailure,
}

impl ErrorKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::AuthFailure => "auth_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized connector failure
#[derive(Debug, Clone, Error)]
#[error("{kind} backend error: {detail}")]
pub struct ConnectorError {
    /// Failure classification used by retry policy
    pub kind: ErrorKind,
    /// Human-readable detail for logs and audit records
    pub detail: String,
}

impl ConnectorError {
    /// Create a transient error
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            detail: detail.into(),
        }
    }

    /// Create a permanent error
    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            detail: detail.into(),
        }
    }

    /// Create an auth failure
    pub fn auth(detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::AuthFailure,
            detail: detail.into(),
        }
    }

    /// Whether retry policy may re-attempt this error at all
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Map an HTTP status code to the normalized error kind.
///
/// 401/403 are auth failures, 408/429 and all 5xx are transient,
/// everything else client-side is permanent.
#[must_use]
pub fn kind_for_status(status: reqwest::StatusCode) -> ErrorKind {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        ErrorKind::AuthFailure
    } else if status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Map a reqwest transport error to a `ConnectorError`.
///
/// Connection and timeout failures are transient; everything else
/// (invalid URL, body decode) is permanent.
pub fn from_transport(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() || err.is_connect() {
        ConnectorError::transient(format!("request failed: {err}"))
    } else {
        ConnectorError::permanent(format!("request failed: {err}"))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_kind_for_status() {
        assert_eq!(kind_for_status(StatusCode::UNAUTHORIZED), ErrorKind::AuthFailure);
        assert_eq!(kind_for_status(StatusCode::FORBIDDEN), ErrorKind::AuthFailure);
        assert_eq!(kind_for_status(StatusCode::TOO_MANY_REQUESTS), ErrorKind::Transient);
        assert_eq!(kind_for_status(StatusCode::REQUEST_TIMEOUT), ErrorKind::Transient);
        assert_eq!(kind_for_status(StatusCode::SERVICE_UNAVAILABLE), ErrorKind::Transient);
        assert_eq!(kind_for_status(StatusCode::INTERNAL_SERVER_ERROR), ErrorKind::Transient);
        assert_eq!(kind_for_status(StatusCode::NOT_FOUND), ErrorKind::Permanent);
        assert_eq!(kind_for_status(StatusCode::UNPROCESSABLE_ENTITY), ErrorKind::Permanent);
    }

    #[test]
    fn test_retryable() {
        assert!(ConnectorError::transient("x").is_retryable());
        assert!(!ConnectorError::permanent("x").is_retryable());
        assert!(!ConnectorError::auth("x").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ConnectorError::transient("connection reset");
        assert_eq!(err.to_string(), "transient backend error: connection reset");
    }
}
