//! Error types for toolgate-core
//!
//! One taxonomy covers the whole request pipeline. Validation and
//! authorization failures (`UnknownTenant` through `RateLimited`) are
//! client-attributable and never retried; backend failures carry the
//! normalized [`ErrorKind`] so the HTTP layer can map them without
//! knowing which connector produced them.

use std::time::Duration;
use thiserror::Error;
use toolgate_connectors::ErrorKind;

/// Gateway error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Tenant identifier not present in the backing store
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    /// Tenant exists but is suspended
    #[error("tenant suspended: {0}")]
    TenantSuspended(String),

    /// Tool name absent from the registry
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments failed schema validation
    #[error("invalid arguments: field '{field}': {message}")]
    InvalidArguments {
        /// Field that failed validation
        field: String,
        /// What was wrong with it
        message: String,
    },

    /// Tenant is not allowed to use the tool's connector
    #[error("tenant '{tenant_id}' is not allowed to use connector '{connector}'")]
    Forbidden {
        /// Tenant that was rejected
        tenant_id: String,
        /// Connector the tool requires
        connector: String,
    },

    /// Tenant exhausted its request quota
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Estimated wait until a token is available
        retry_after: Duration,
    },

    /// Backend operation failed terminally (non-retryable or retries exhausted)
    #[error("backend failure after {attempts} attempt(s): {detail}")]
    Backend {
        /// Normalized failure classification
        kind: ErrorKind,
        /// Attempts made before giving up
        attempts: u32,
        /// Last underlying error detail
        detail: String,
    },

    /// A non-idempotent operation failed transiently and the side-effect
    /// status cannot be determined; the caller must verify backend state.
    #[error("ambiguous failure, side-effect status unknown: {detail}")]
    AmbiguousFailure {
        /// Last underlying error detail
        detail: String,
    },

    /// Call deadline exceeded; in-flight backend work was abandoned
    #[error("deadline exceeded")]
    Timeout,

    /// Gateway-internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable label for API responses and audit records
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::UnknownTenant(_) => "unknown_tenant",
            Self::TenantSuspended(_) => "tenant_suspended",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::Backend { kind, .. } => match kind {
                ErrorKind::Transient => "transient",
                ErrorKind::Permanent => "permanent",
                ErrorKind::AuthFailure => "auth_failure",
            },
            Self::AmbiguousFailure { .. } => "ambiguous_failure",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the failure is attributable to the caller (4xx territory)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTenant(_)
                | Self::TenantSuspended(_)
                | Self::UnknownTool(_)
                | Self::InvalidArguments { .. }
                | Self::Forbidden { .. }
                | Self::RateLimited { .. }
        )
    }

    /// Estimated retry-after, when the error carries one
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
