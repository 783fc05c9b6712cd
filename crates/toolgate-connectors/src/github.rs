//! Source-control connector
//!
//! Translates normalized tool operations into git-hosting REST calls
//! (GitHub-compatible API surface). Read operations (list/get) are
//! idempotent; write operations (create issue, create pull request)
//! consume backend state and are not, and the backend offers no
//! idempotency-key mechanism, so the retry controller must never
//! re-send them after an ambiguous failure.

use crate::error::{from_transport, kind_for_status, ConnectorError, Result};
use crate::{optional_str, require_str, Connector, ConnectorKind, ConnectorRequest, CredentialSet};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Configuration for the source-control connector
#[derive(Debug, Clone, Deserialize)]
pub struct SourceControlConfig {
    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// User agent sent with every request (required by the GitHub API)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    format!("toolgate/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for SourceControlConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// Connector for a git-hosting REST API
pub struct SourceControlConnector {
    config: SourceControlConfig,
    client: reqwest::Client,
}

impl SourceControlConnector {
    /// Create a new connector
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SourceControlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConnectorError::permanent(format!("http client build failed: {e}")))?;
        Ok(Self { config, client })
    }

    fn token<'a>(&self, credentials: &'a CredentialSet) -> Result<&'a str> {
        credentials
            .source_control_token
            .as_deref()
            .ok_or_else(|| ConnectorError::auth("no source-control token configured for tenant"))
    }

    fn repo_url(&self, params: &serde_json::Value, tail: &str) -> Result<String> {
        let owner = require_str(params, "owner")?;
        let repo = require_str(params, "repo")?;
        Ok(format!(
            "{}/repos/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            tail
        ))
    }

    async fn get_json(&self, url: &str, token: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(from_transport)?;
        read_json_response(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(body)
            .send()
            .await
            .map_err(from_transport)?;
        read_json_response(response).await
    }
}

/// Parse a response body, mapping non-2xx statuses to normalized errors
async fn read_json_response(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if status.is_success() {
        if status == StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        return response
            .json()
            .await
            .map_err(|e| ConnectorError::permanent(format!("invalid response body: {e}")));
    }
    let detail = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unreadable body>"));
    Err(ConnectorError {
        kind: kind_for_status(status),
        detail: format!("http {status}: {}", truncate(&detail, 256)),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait::async_trait]
impl Connector for SourceControlConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::SourceControl
    }

    fn is_idempotent(&self, operation: &str) -> bool {
        matches!(operation, "list_issues" | "get_issue" | "list_pull_requests")
    }

    async fn invoke(
        &self,
        request: &ConnectorRequest,
        credentials: &CredentialSet,
    ) -> Result<serde_json::Value> {
        let token = self.token(credentials)?;
        let params = &request.params;
        debug!(operation = %request.operation, "Invoking source-control backend");

        match request.operation.as_str() {
            "list_issues" => {
                let state = optional_str(params, "state").unwrap_or("open");
                let url = self.repo_url(params, "issues")?;
                let url = format!("{url}?state={}", urlencoding::encode(state));
                let issues = self.get_json(&url, token).await?;
                Ok(serde_json::json!({ "issues": issues }))
            }
            "get_issue" => {
                let number = params
                    .get("number")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| ConnectorError::permanent("missing required parameter: number"))?;
                let url = self.repo_url(params, &format!("issues/{number}"))?;
                self.get_json(&url, token).await
            }
            "create_issue" => {
                let title = require_str(params, "title")?;
                let mut body = serde_json::json!({ "title": title });
                if let Some(text) = optional_str(params, "body") {
                    body["body"] = serde_json::Value::String(text.to_string());
                }
                let url = self.repo_url(params, "issues")?;
                self.post_json(&url, token, &body).await
            }
            "list_pull_requests" => {
                let state = optional_str(params, "state").unwrap_or("open");
                let url = self.repo_url(params, "pulls")?;
                let url = format!("{url}?state={}", urlencoding::encode(state));
                let pulls = self.get_json(&url, token).await?;
                Ok(serde_json::json!({ "pull_requests": pulls }))
            }
            "create_pull_request" => {
                let title = require_str(params, "title")?;
                let head = require_str(params, "head")?;
                let base = require_str(params, "base")?;
                let mut body = serde_json::json!({
                    "title": title,
                    "head": head,
                    "base": base,
                });
                if let Some(text) = optional_str(params, "body") {
                    body["body"] = serde_json::Value::String(text.to_string());
                }
                let url = self.repo_url(params, "pulls")?;
                self.post_json(&url, token, &body).await
            }
            other => Err(ConnectorError::permanent(format!(
                "unsupported source-control operation: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn connector() -> SourceControlConnector {
        SourceControlConnector::new(SourceControlConfig {
            base_url: "https://git.example.com".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_idempotency_classification() {
        let c = connector();
        assert!(c.is_idempotent("list_issues"));
        assert!(c.is_idempotent("get_issue"));
        assert!(c.is_idempotent("list_pull_requests"));
        assert!(!c.is_idempotent("create_issue"));
        assert!(!c.is_idempotent("create_pull_request"));
        assert!(!c.supports_idempotency_key("create_issue"));
    }

    #[test]
    fn test_repo_url_encodes_segments() {
        let c = connector();
        let params = serde_json::json!({"owner": "acme", "repo": "widgets"});
        let url = c.repo_url(&params, "issues").unwrap();
        assert_eq!(url, "https://git.example.com/repos/acme/widgets/issues");

        let params = serde_json::json!({"owner": "acme", "repo": "a/b"});
        let url = c.repo_url(&params, "issues").unwrap();
        assert!(url.contains("a%2Fb"));
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_failure() {
        let c = connector();
        let request = ConnectorRequest::new(
            "list_issues",
            serde_json::json!({"owner": "acme", "repo": "widgets"}),
        );
        let err = c.invoke(&request, &CredentialSet::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthFailure);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_permanent() {
        let c = connector();
        let request = ConnectorRequest::new("delete_repo", serde_json::json!({}));
        let creds = CredentialSet {
            source_control_token: Some("t".to_string()),
            ..Default::default()
        };
        let err = c.invoke(&request, &creds).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
        assert!(err.detail.contains("delete_repo"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
    }
}
