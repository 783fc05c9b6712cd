//! Tool-call request and result types
//!
//! A `ToolCall` is immutable once constructed at ingress and is dropped
//! after the response is returned; nothing outlives it except its audit
//! record.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A single structured invocation request from the calling agent
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Unique request identifier (generated at ingress when absent)
    pub request_id: Uuid,
    /// Tenant on whose behalf the call executes
    pub tenant_id: String,
    /// Registered tool name
    pub tool_name: String,
    /// Tool arguments (validated against the registry schema)
    pub arguments: serde_json::Value,
    /// Per-call deadline; the engine default applies when absent
    pub deadline: Option<Duration>,
}

impl ToolCall {
    /// Create a new tool call with a generated request id
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            tool_name: tool_name.into(),
            arguments,
            deadline: None,
        }
    }

    /// Use a caller-supplied request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Set a per-call deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Overall outcome of a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// All steps completed
    Success,
    /// Execution halted after at least one committed side effect
    PartialFailure,
    /// Execution failed with no committed side effects (or timed out)
    Failure,
}

impl ToolCallStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failure => "failure",
        }
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a handled tool call, returned to the ingress layer
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// Request this result answers
    pub request_id: Uuid,
    /// Overall outcome
    pub status: ToolCallStatus,
    /// Final step output on success (or last successful output on partial failure)
    pub result: Option<serde_json::Value>,
    /// Terminal error when status is not success
    pub error: Option<Error>,
}

impl ToolCallResult {
    /// Create a successful result
    #[must_use]
    pub fn success(request_id: Uuid, result: serde_json::Value) -> Self {
        Self {
            request_id,
            status: ToolCallStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    /// Create a failed result
    #[must_use]
    pub fn failure(request_id: Uuid, status: ToolCallStatus, error: Error) -> Self {
        Self {
            request_id,
            status,
            result: None,
            error: Some(error),
        }
    }

    /// Attach the last successful step output (partial failures)
    #[must_use]
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}
