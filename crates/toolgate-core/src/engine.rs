//! Tool-call execution engine
//!
//! `Engine::handle` drives the whole pipeline for one call: registry
//! lookup, argument validation, tenant resolution, connector
//! authorization, rate limiting, then the tool's step plan under the
//! call deadline. Every path out of the pipeline emits exactly one
//! audit record.

use crate::audit::{redact_arguments, AuditLogger, AuditRecord, BackendCall};
use crate::error::{Error, Result};
use crate::registry::{StepKind, ToolRegistry, ToolSpec, DEFAULT_POLL_INTERVAL};
use crate::retry::{RetryController, RetryOutcome};
use crate::tenant::{TenantContext, TenantResolver};
use crate::toolcall::{ToolCall, ToolCallResult, ToolCallStatus};
use crate::rate_limit::TenantRateLimiter;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use toolgate_connectors::{Connector, ConnectorKind, ConnectorRequest, ErrorKind};
use tracing::{debug, info, warn};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline applied when the call does not carry one
    pub default_deadline: Duration,
    /// Interval between job-status polls
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Mutable per-call execution state.
///
/// Owned outside the deadline-bounded future so the backend calls made
/// before a timeout still reach the audit record.
#[derive(Default)]
struct ExecutionState {
    backend_calls: Vec<BackendCall>,
    /// A non-idempotent step has succeeded; later failures are partial.
    committed: bool,
    last_output: Option<Value>,
}

/// The gateway's execution engine
pub struct Engine {
    registry: Arc<ToolRegistry>,
    resolver: Arc<TenantResolver>,
    rate_limiter: TenantRateLimiter,
    connectors: HashMap<ConnectorKind, Arc<dyn Connector>>,
    retry: RetryController,
    audit: Arc<AuditLogger>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine; connectors are registered afterwards
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        resolver: Arc<TenantResolver>,
        retry: RetryController,
        audit: Arc<AuditLogger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            rate_limiter: TenantRateLimiter::new(),
            connectors: HashMap::new(),
            retry,
            audit,
            config,
        }
    }

    /// Register the connector serving a backend kind
    pub fn register_connector(&mut self, connector: Arc<dyn Connector>) {
        debug!(connector = %connector.kind(), "Registering connector");
        self.connectors.insert(connector.kind(), connector);
    }

    /// The tool registry backing this engine
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one tool call to completion.
    ///
    /// Never returns an `Err`: every failure is folded into the result
    /// so the ingress layer has a single shape to map. Exactly one
    /// audit record is emitted per call, whatever happens.
    pub async fn handle(&self, call: ToolCall) -> ToolCallResult {
        let started_at = Utc::now();
        let mut state = ExecutionState::default();

        let outcome = self.run_pipeline(&call, &mut state).await;

        let (status, result, error) = match outcome {
            Ok(value) => (ToolCallStatus::Success, Some(value), None),
            Err(error) => {
                let status = if state.committed && !matches!(error, Error::Timeout) {
                    ToolCallStatus::PartialFailure
                } else {
                    ToolCallStatus::Failure
                };
                // A partial failure keeps the last committed step output
                // so the caller can see what did happen.
                let partial = if status == ToolCallStatus::PartialFailure {
                    state.last_output.take()
                } else {
                    None
                };
                (status, partial, Some(error))
            }
        };

        if matches!(
            error,
            Some(Error::Backend {
                kind: ErrorKind::AuthFailure,
                ..
            })
        ) {
            // Stale credentials are the common cause; force the next
            // call to re-resolve from the store.
            self.resolver.invalidate(&call.tenant_id).await;
        }

        self.audit.record(AuditRecord {
            request_id: call.request_id,
            tenant_id: call.tenant_id.clone(),
            tool_name: call.tool_name.clone(),
            started_at,
            ended_at: Utc::now(),
            outcome: status,
            error_kind: error.as_ref().map(|e| e.kind_label().to_string()),
            redacted_arguments: redact_arguments(&call.arguments),
            backend_calls: std::mem::take(&mut state.backend_calls),
        });

        match error {
            None => {
                info!(
                    request_id = %call.request_id,
                    tenant = %call.tenant_id,
                    tool = %call.tool_name,
                    "Tool call succeeded"
                );
                ToolCallResult::success(call.request_id, result.unwrap_or(Value::Null))
            }
            Some(error) => {
                if error.is_client_error() {
                    info!(
                        request_id = %call.request_id,
                        tenant = %call.tenant_id,
                        tool = %call.tool_name,
                        error = %error,
                        "Tool call rejected"
                    );
                } else {
                    warn!(
                        request_id = %call.request_id,
                        tenant = %call.tenant_id,
                        tool = %call.tool_name,
                        status = %status,
                        error = %error,
                        "Tool call failed"
                    );
                }
                let mut failure = ToolCallResult::failure(call.request_id, status, error);
                if let Some(partial) = result {
                    failure = failure.with_result(partial);
                }
                failure
            }
        }
    }

    async fn run_pipeline(&self, call: &ToolCall, state: &mut ExecutionState) -> Result<Value> {
        let spec = self
            .registry
            .get(&call.tool_name)
            .ok_or_else(|| Error::UnknownTool(call.tool_name.clone()))?;

        ToolRegistry::validate_arguments(spec, &call.arguments)?;

        let tenant = self.resolver.resolve(&call.tenant_id).await?;

        if !tenant.allowed_connectors.contains(&spec.connector) {
            return Err(Error::Forbidden {
                tenant_id: tenant.tenant_id.clone(),
                connector: spec.connector.as_str().to_string(),
            });
        }

        let decision = self.rate_limiter.acquire(&tenant.tenant_id, &tenant.rate_quota);
        if !decision.allowed {
            return Err(Error::RateLimited {
                retry_after: decision.retry_after,
            });
        }

        let connector = self
            .connectors
            .get(&spec.connector)
            .ok_or_else(|| {
                Error::Internal(format!("no connector registered for {}", spec.connector))
            })?
            .clone();

        let deadline = call.deadline.unwrap_or(self.config.default_deadline);
        match timeout(deadline, self.run_steps(spec, &connector, &tenant, call, state)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    request_id = %call.request_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "Call deadline exceeded"
                );
                Err(Error::Timeout)
            }
        }
    }

    async fn run_steps(
        &self,
        spec: &ToolSpec,
        connector: &Arc<dyn Connector>,
        tenant: &TenantContext,
        call: &ToolCall,
        state: &mut ExecutionState,
    ) -> Result<Value> {
        for step in &spec.steps {
            let params = merge_params(&call.arguments, state.last_output.as_ref());
            let output = match step.kind {
                StepKind::Invoke => {
                    self.invoke_step(connector, tenant, &step.operation, params, state)
                        .await?
                }
                StepKind::PollUntilTerminal => {
                    self.poll_step(connector, tenant, &step.operation, params, state)
                        .await?
                }
            };
            if !connector.is_idempotent(&step.operation) {
                state.committed = true;
            }
            state.last_output = Some(output);
        }

        Ok(state.last_output.take().unwrap_or(Value::Null))
    }

    /// One operation through retry policy, recorded as one backend call
    async fn invoke_step(
        &self,
        connector: &Arc<dyn Connector>,
        tenant: &TenantContext,
        operation: &str,
        params: Value,
        state: &mut ExecutionState,
    ) -> Result<Value> {
        let idempotent = connector.is_idempotent(operation);
        let key_protected = connector.supports_idempotency_key(operation);
        let request = ConnectorRequest {
            operation: operation.to_string(),
            params,
        };

        let outcome = self
            .retry
            .execute(idempotent, key_protected, || {
                connector.invoke(&request, &tenant.credentials)
            })
            .await;

        let (result, attempts, status) = match outcome {
            RetryOutcome::Success { value, attempts } => (Ok(value), attempts, "success"),
            RetryOutcome::Failure { error, attempts } => (
                Err(Error::Backend {
                    kind: error.kind,
                    attempts,
                    detail: error.detail,
                }),
                attempts,
                "failure",
            ),
            RetryOutcome::Ambiguous { error, attempts } => (
                Err(Error::AmbiguousFailure {
                    detail: error.detail,
                }),
                attempts,
                "ambiguous",
            ),
        };

        state.backend_calls.push(BackendCall {
            connector: connector.kind().as_str().to_string(),
            operation: operation.to_string(),
            attempt_count: attempts,
            final_status: status.to_string(),
            detail: backend_detail(&result),
        });

        result
    }

    /// Re-invoke until the output reports a terminal job status.
    ///
    /// The whole poll loop is one backend call in the audit record;
    /// `attempt_count` is the total number of polls made. The loop has
    /// no bound of its own, the call deadline cuts it off.
    async fn poll_step(
        &self,
        connector: &Arc<dyn Connector>,
        tenant: &TenantContext,
        operation: &str,
        params: Value,
        state: &mut ExecutionState,
    ) -> Result<Value> {
        let request = ConnectorRequest {
            operation: operation.to_string(),
            params,
        };
        let mut polls: u32 = 0;

        loop {
            let outcome = self
                .retry
                .execute(true, false, || {
                    connector.invoke(&request, &tenant.credentials)
                })
                .await;

            match outcome {
                RetryOutcome::Success { value, attempts } => {
                    polls += attempts;
                    let status = value.get("status").and_then(Value::as_str).unwrap_or("");
                    if toolgate_connectors::is_terminal_status(status) {
                        state.backend_calls.push(BackendCall {
                            connector: connector.kind().as_str().to_string(),
                            operation: operation.to_string(),
                            attempt_count: polls,
                            final_status: "success".to_string(),
                            detail: detail_from_output(&value),
                        });
                        return Ok(value);
                    }
                    debug!(status = %status, polls = polls, "Job not yet terminal");
                }
                RetryOutcome::Failure { error, attempts } => {
                    polls += attempts;
                    state.backend_calls.push(BackendCall {
                        connector: connector.kind().as_str().to_string(),
                        operation: operation.to_string(),
                        attempt_count: polls,
                        final_status: "failure".to_string(),
                        detail: Some(error.detail.clone()),
                    });
                    return Err(Error::Backend {
                        kind: error.kind,
                        attempts: polls,
                        detail: error.detail,
                    });
                }
                RetryOutcome::Ambiguous { .. } => {
                    // Polling is declared idempotent above; unreachable.
                    return Err(Error::Internal("ambiguous outcome from poll".to_string()));
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Next step parameters: original arguments overlaid with the previous
/// step's output fields (a submit step's `job_id` feeds the poll step).
fn merge_params(arguments: &Value, last_output: Option<&Value>) -> Value {
    let mut merged = match arguments.as_object() {
        Some(map) => map.clone(),
        None => serde_json::Map::new(),
    };
    if let Some(Value::Object(output)) = last_output {
        for (k, v) in output {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

fn backend_detail(result: &Result<Value>) -> Option<String> {
    match result {
        Ok(value) => detail_from_output(value),
        Err(Error::Backend { detail, .. }) | Err(Error::AmbiguousFailure { detail }) => {
            Some(detail.clone())
        }
        Err(_) => None,
    }
}

/// Backend-assigned job handle, when the output carries one
fn detail_from_output(output: &Value) -> Option<String> {
    output
        .get("job_id")
        .and_then(Value::as_str)
        .map(|id| format!("job_id={id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::retry::RetryPolicy;
    use crate::tenant::{RateQuota, ResolverConfig, StaticTenantStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use toolgate_connectors::{ConnectorError, CredentialSet};

    struct FakeSourceControl {
        invocations: AtomicU32,
        fail_first: u32,
    }

    impl FakeSourceControl {
        fn new(fail_first: u32) -> Self {
            Self {
                invocations: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl Connector for FakeSourceControl {
        fn kind(&self) -> ConnectorKind {
            ConnectorKind::SourceControl
        }

        fn is_idempotent(&self, operation: &str) -> bool {
            operation.starts_with("list_") || operation.starts_with("get_")
        }

        async fn invoke(
            &self,
            request: &ConnectorRequest,
            _credentials: &CredentialSet,
        ) -> toolgate_connectors::Result<Value> {
            let n = self.invocations.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ConnectorError::transient("503 from upstream"));
            }
            Ok(json!({"operation": request.operation, "items": []}))
        }
    }

    fn engine_with(
        connector: Arc<dyn Connector>,
        sink: Arc<MemoryAuditSink>,
        quota: RateQuota,
    ) -> Engine {
        let mut store = StaticTenantStore::new();
        store.insert(TenantContext {
            tenant_id: "demo".to_string(),
            credentials: CredentialSet::default(),
            allowed_connectors: [ConnectorKind::SourceControl].into_iter().collect(),
            rate_quota: quota,
            suspended: false,
        });
        let resolver = Arc::new(TenantResolver::new(
            Arc::new(store),
            ResolverConfig::default(),
        ));
        let retry = RetryController::new(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        let audit = Arc::new(AuditLogger::new(sink as Arc<dyn crate::audit::AuditSink>, 64));
        let mut engine = Engine::new(
            Arc::new(ToolRegistry::builtins()),
            resolver,
            retry,
            audit,
            EngineConfig::default(),
        );
        engine.register_connector(connector);
        engine
    }

    #[tokio::test]
    async fn test_successful_call() {
        let sink = Arc::new(MemoryAuditSink::new());
        let engine = engine_with(
            Arc::new(FakeSourceControl::new(0)),
            sink.clone(),
            RateQuota::default(),
        );
        let call = ToolCall::new("demo", "list_issues", json!({"owner": "acme", "repo": "w"}));
        let result = engine.handle(call).await;
        assert_eq!(result.status, ToolCallStatus::Success);
        assert!(result.result.is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_audited() {
        let sink = Arc::new(MemoryAuditSink::new());
        let engine = engine_with(
            Arc::new(FakeSourceControl::new(0)),
            sink.clone(),
            RateQuota::default(),
        );
        let call = ToolCall::new("demo", "no_such_tool", json!({}));
        let result = engine.handle(call).await;
        assert_eq!(result.status, ToolCallStatus::Failure);
        assert!(matches!(result.error, Some(Error::UnknownTool(_))));
        engine.audit.shutdown().await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_kind.as_deref(), Some("unknown_tool"));
        assert!(records[0].backend_calls.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_connector() {
        let sink = Arc::new(MemoryAuditSink::new());
        let engine = engine_with(
            Arc::new(FakeSourceControl::new(0)),
            sink,
            RateQuota::default(),
        );
        // demo may only use source_control; run_circuit needs quantum_exec.
        let call = ToolCall::new("demo", "run_circuit", json!({"circuit": {}}));
        let result = engine.handle(call).await;
        assert!(matches!(result.error, Some(Error::Forbidden { .. })));
    }

    #[tokio::test]
    async fn test_rate_limit_enforced() {
        let sink = Arc::new(MemoryAuditSink::new());
        let engine = engine_with(
            Arc::new(FakeSourceControl::new(0)),
            sink,
            RateQuota {
                max_requests: 2,
                interval_secs: 3600,
            },
        );
        let args = json!({"owner": "acme", "repo": "w"});
        for _ in 0..2 {
            let result = engine
                .handle(ToolCall::new("demo", "list_issues", args.clone()))
                .await;
            assert_eq!(result.status, ToolCallStatus::Success);
        }
        let result = engine
            .handle(ToolCall::new("demo", "list_issues", args))
            .await;
        assert!(matches!(result.error, Some(Error::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_transient_retry_recorded_in_audit() {
        let sink = Arc::new(MemoryAuditSink::new());
        let engine = engine_with(
            Arc::new(FakeSourceControl::new(2)),
            sink.clone(),
            RateQuota::default(),
        );
        let call = ToolCall::new("demo", "list_issues", json!({"owner": "acme", "repo": "w"}));
        let result = engine.handle(call).await;
        assert_eq!(result.status, ToolCallStatus::Success);
        engine.audit.shutdown().await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].backend_calls.len(), 1);
        assert_eq!(records[0].backend_calls[0].attempt_count, 3);
    }

    #[tokio::test]
    async fn test_non_idempotent_transient_is_ambiguous() {
        let sink = Arc::new(MemoryAuditSink::new());
        let connector = Arc::new(FakeSourceControl::new(99));
        let engine = engine_with(connector.clone(), sink, RateQuota::default());
        let call = ToolCall::new(
            "demo",
            "create_issue",
            json!({"owner": "acme", "repo": "w", "title": "t"}),
        );
        let result = engine.handle(call).await;
        assert!(matches!(result.error, Some(Error::AmbiguousFailure { .. })));
        assert_eq!(connector.invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_merge_params_overlays_output() {
        let args = json!({"circuit": {"gates": []}, "shots": 100});
        let output = json!({"job_id": "j-1", "status": "queued"});
        let merged = merge_params(&args, Some(&output));
        assert_eq!(merged["shots"], 100);
        assert_eq!(merged["job_id"], "j-1");
    }
}
