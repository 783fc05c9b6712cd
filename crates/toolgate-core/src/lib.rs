//! Core engine for the toolgate gateway
//!
//! Ties tenant resolution, the tool registry, rate limiting, retry
//! policy, and audit logging into a single execution pipeline. The
//! ingress layer hands a [`ToolCall`] to an [`Engine`] and gets back a
//! [`ToolCallResult`]; everything in between lives here.

pub mod audit;
pub mod engine;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod tenant;
pub mod toolcall;

pub use audit::{
    redact_arguments, AuditLogger, AuditRecord, AuditSink, BackendCall, JsonlAuditSink,
    MemoryAuditSink, REDACTED,
};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use rate_limit::{RateLimitDecision, TenantRateLimiter};
pub use registry::{StepKind, ToolDescriptor, ToolRegistry, ToolSpec, WorkflowStep};
pub use retry::{RetryController, RetryOutcome, RetryPolicy};
pub use tenant::{
    RateQuota, ResolverConfig, StaticTenantStore, TenantContext, TenantResolver, TenantStore,
};
pub use toolcall::{ToolCall, ToolCallResult, ToolCallStatus};
