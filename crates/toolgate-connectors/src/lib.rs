//! Toolgate connector adapters
//!
//! Each adapter translates a normalized `ConnectorRequest` into one
//! backend's protocol and normalizes the response and every error back
//! into the shared contract:
//!
//! - [`github::SourceControlConnector`] — git-hosting REST API
//! - [`odata::EnterpriseDataConnector`] — OData entity extraction
//! - [`quantum::QuantumConnector`] — quantum job submit/poll
//!
//! Adapters are stateless beyond their HTTP client and configuration;
//! credentials arrive with every invocation so a single adapter instance
//! serves all tenants.

pub mod error;
pub mod github;
pub mod odata;
pub mod quantum;

pub use error::{ConnectorError, ErrorKind, Result};
pub use github::{SourceControlConfig, SourceControlConnector};
pub use odata::{EnterpriseDataConfig, EnterpriseDataConnector, PageCursor, RecordBatch};
pub use quantum::{is_terminal_status, QuantumConfig, QuantumConnector, TERMINAL_JOB_STATES};

use serde::{Deserialize, Serialize};

/// Backend family served by a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// Git-hosting REST API (issues, pull requests)
    SourceControl,
    /// Enterprise OData extraction (read-only)
    EnterpriseData,
    /// Quantum circuit execution (submit/poll)
    QuantumExec,
}

impl ConnectorKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceControl => "source_control",
            Self::EnterpriseData => "enterprise_data",
            Self::QuantumExec => "quantum_exec",
        }
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-backend secrets for one tenant.
///
/// A missing token for the backend being invoked surfaces as an
/// `AuthFailure` from the adapter, not a panic.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialSet {
    /// Token for the git-hosting API
    #[serde(default)]
    pub source_control_token: Option<String>,
    /// OAuth bearer token for the OData endpoint
    #[serde(default)]
    pub enterprise_data_token: Option<String>,
    /// Token for the quantum execution API
    #[serde(default)]
    pub quantum_token: Option<String>,
}

impl std::fmt::Debug for CredentialSet {
    // Secrets never reach logs through Debug formatting.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("source_control_token", &self.source_control_token.as_ref().map(|_| "[REDACTED]"))
            .field("enterprise_data_token", &self.enterprise_data_token.as_ref().map(|_| "[REDACTED]"))
            .field("quantum_token", &self.quantum_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Normalized request handed to an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRequest {
    /// Operation identifier within the connector (e.g. `list_issues`)
    pub operation: String,
    /// Operation parameters, already schema-validated by the router
    pub params: serde_json::Value,
}

impl ConnectorRequest {
    /// Create a new request
    #[must_use]
    pub fn new(operation: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            params,
        }
    }
}

/// Trait for connector adapter implementations
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Backend family this adapter serves
    fn kind(&self) -> ConnectorKind;

    /// Whether the given operation may be safely repeated
    fn is_idempotent(&self, operation: &str) -> bool;

    /// Whether the backend honors an idempotency key for this operation,
    /// making a retry of a non-idempotent operation provably safe.
    fn supports_idempotency_key(&self, _operation: &str) -> bool {
        false
    }

    /// Execute the operation against the backend
    async fn invoke(
        &self,
        request: &ConnectorRequest,
        credentials: &CredentialSet,
    ) -> Result<serde_json::Value>;
}

/// Extract a required string parameter.
///
/// Connectors only see schema-validated input, so a missing parameter
/// here is a contract violation and maps to a permanent error.
pub(crate) fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ConnectorError::permanent(format!("missing required parameter: {key}")))
}

/// Extract an optional string parameter
pub(crate) fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
