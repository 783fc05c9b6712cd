//! Quantum-execution connector
//!
//! Submits circuit definitions to a job-queue backend and polls job
//! status. Submission consumes a job slot and is therefore
//! non-idempotent; polling is a pure read. The execution engine models
//! a circuit run as two workflow steps (submit, then poll-until-terminal
//! bounded by the call deadline), so this connector only exposes the
//! two primitive operations.

use crate::error::{from_transport, kind_for_status, ConnectorError, Result};
use crate::{optional_str, require_str, Connector, ConnectorKind, ConnectorRequest, CredentialSet};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Job states after which polling must stop
pub const TERMINAL_JOB_STATES: &[&str] = &["completed", "failed", "cancelled"];

/// Returns true when a job status will never change again
#[must_use]
pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_JOB_STATES.contains(&status)
}

/// Configuration for the quantum-execution connector
#[derive(Debug, Clone, Deserialize)]
pub struct QuantumConfig {
    /// Job API base URL
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Default backend when the tool call names none
    #[serde(default = "default_backend")]
    pub default_backend: String,
    /// Default shot count when the tool call names none
    #[serde(default = "default_shots")]
    pub default_shots: u64,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_backend() -> String {
    "simulator".to_string()
}

fn default_shots() -> u64 {
    1024
}

impl Default for QuantumConfig {
    fn default() -> Self {
        Self {
            base_url: "https://quantum.example.com".to_string(),
            timeout_ms: default_timeout_ms(),
            default_backend: default_backend(),
            default_shots: default_shots(),
        }
    }
}

/// Connector for a quantum job-submission REST API
pub struct QuantumConnector {
    config: QuantumConfig,
    client: reqwest::Client,
}

impl QuantumConnector {
    /// Create a new connector
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: QuantumConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ConnectorError::permanent(format!("http client build failed: {e}")))?;
        Ok(Self { config, client })
    }

    fn jobs_url(&self) -> String {
        format!("{}/api/v1/jobs", self.config.base_url.trim_end_matches('/'))
    }

    async fn submit(
        &self,
        params: &serde_json::Value,
        token: &str,
    ) -> Result<serde_json::Value> {
        let circuit = params
            .get("circuit")
            .ok_or_else(|| ConnectorError::permanent("missing required parameter: circuit"))?;
        let shots = params
            .get("shots")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.config.default_shots);
        let backend = optional_str(params, "backend").unwrap_or(&self.config.default_backend);

        let body = serde_json::json!({
            "circuit": circuit,
            "shots": shots,
            "backend": backend,
        });

        let response = self
            .client
            .post(self.jobs_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ConnectorError {
                kind: kind_for_status(status),
                detail: format!("job submission failed, http {status}: {detail}"),
            });
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::permanent(format!("invalid submit response: {e}")))?;

        debug!(job_id = %body.job_id, backend = %backend, "Circuit submitted");
        Ok(serde_json::json!({
            "job_id": body.job_id,
            "status": body.status.unwrap_or_else(|| "queued".to_string()),
        }))
    }

    async fn poll(&self, params: &serde_json::Value, token: &str) -> Result<serde_json::Value> {
        let job_id = require_str(params, "job_id")?;
        let url = format!("{}/{}", self.jobs_url(), urlencoding::encode(job_id));

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ConnectorError {
                kind: kind_for_status(status),
                detail: format!("job poll failed, http {status}: {detail}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ConnectorError::permanent(format!("invalid poll response: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait::async_trait]
impl Connector for QuantumConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::QuantumExec
    }

    fn is_idempotent(&self, operation: &str) -> bool {
        operation == "poll"
    }

    async fn invoke(
        &self,
        request: &ConnectorRequest,
        credentials: &CredentialSet,
    ) -> Result<serde_json::Value> {
        let token = credentials
            .quantum_token
            .as_deref()
            .ok_or_else(|| ConnectorError::auth("no quantum token configured for tenant"))?;

        match request.operation.as_str() {
            "submit" => self.submit(&request.params, token).await,
            "poll" => self.poll(&request.params, token).await,
            other => Err(ConnectorError::permanent(format!(
                "unsupported quantum operation: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_terminal_states() {
        assert!(is_terminal_status("completed"));
        assert!(is_terminal_status("failed"));
        assert!(is_terminal_status("cancelled"));
        assert!(!is_terminal_status("queued"));
        assert!(!is_terminal_status("running"));
    }

    #[test]
    fn test_idempotency_classification() {
        let c = QuantumConnector::new(QuantumConfig::default()).unwrap();
        assert!(c.is_idempotent("poll"));
        assert!(!c.is_idempotent("submit"));
    }

    #[test]
    fn test_jobs_url_trims_slash() {
        let c = QuantumConnector::new(QuantumConfig {
            base_url: "https://q.example.com/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(c.jobs_url(), "https://q.example.com/api/v1/jobs");
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_failure() {
        let c = QuantumConnector::new(QuantumConfig::default()).unwrap();
        let request = ConnectorRequest::new("poll", serde_json::json!({"job_id": "j1"}));
        let err = c.invoke(&request, &CredentialSet::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthFailure);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_permanent() {
        let c = QuantumConnector::new(QuantumConfig::default()).unwrap();
        let creds = CredentialSet {
            quantum_token: Some("t".to_string()),
            ..Default::default()
        };
        let request = ConnectorRequest::new("cancel", serde_json::json!({}));
        let err = c.invoke(&request, &creds).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }
}
