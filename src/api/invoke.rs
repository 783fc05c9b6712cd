//! Tool invocation endpoint
//!
//! POST /api/v1/invoke - execute a tool call on behalf of a tenant
//!
//! The tenant is identified by the `X-Tenant-Id` header. Gateway errors
//! map onto HTTP status codes; notably 429 carries a `Retry-After`
//! header, a deadline overrun is 504, and an ambiguous side-effect
//! failure is 502 with `kind = "ambiguous_failure"` so callers know to
//! verify backend state before resubmitting.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::ApiResponse;
use crate::server::AppState;
use toolgate_core::{Error, ToolCall, ToolCallStatus};

const TENANT_HEADER: &str = "x-tenant-id";

/// Invocation request body
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    /// Registered tool name
    pub tool_name: String,
    /// Tool arguments
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Caller-supplied request id for end-to-end correlation
    #[serde(default)]
    pub request_id: Option<Uuid>,
    /// Per-call deadline in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// Invocation outcome returned to the caller
#[derive(Debug, Serialize)]
pub struct InvokeData {
    pub request_id: Uuid,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Machine-readable failure detail
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

fn status_for_error(error: &Error) -> StatusCode {
    match error {
        Error::UnknownTenant(_) | Error::UnknownTool(_) => StatusCode::NOT_FOUND,
        Error::TenantSuspended(_) | Error::Forbidden { .. } => StatusCode::FORBIDDEN,
        Error::InvalidArguments { .. } => StatusCode::BAD_REQUEST,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::Backend { .. } | Error::AmbiguousFailure { .. } => StatusCode::BAD_GATEWAY,
        Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A partial failure already committed backend work, so the transport
/// answers 200 and the body's `status`/`error` fields tell the story;
/// only clean failures map the error onto an HTTP status.
fn http_status(status: ToolCallStatus, error: &Error) -> StatusCode {
    if status == ToolCallStatus::PartialFailure {
        StatusCode::OK
    } else {
        status_for_error(error)
    }
}

/// Execute a tool call
pub async fn invoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InvokeRequest>,
) -> Response {
    let Some(tenant_id) = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<InvokeData>::error("missing X-Tenant-Id header")),
        )
            .into_response();
    };

    let mut call = ToolCall::new(tenant_id, request.tool_name, request.arguments);
    if let Some(request_id) = request.request_id {
        call = call.with_request_id(request_id);
    }
    if let Some(deadline_ms) = request.deadline_ms {
        call = call.with_deadline(Duration::from_millis(deadline_ms));
    }

    let result = state.engine.handle(call).await;

    match result.error {
        None => {
            let data = InvokeData {
                request_id: result.request_id,
                status: result.status,
                result: result.result,
                error: None,
            };
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Some(error) => {
            let http_status = http_status(result.status, &error);
            let retry_after = error.retry_after();
            let data = InvokeData {
                request_id: result.request_id,
                status: result.status,
                result: result.result,
                error: Some(ErrorDetail {
                    kind: error.kind_label(),
                    message: error.to_string(),
                    retry_after_secs: retry_after.map(|d| d.as_secs().max(1)),
                }),
            };
            let mut response = (
                http_status,
                Json(ApiResponse {
                    success: false,
                    data: Some(data),
                    error: Some(error.to_string()),
                }),
            )
                .into_response();
            if let Some(wait) = retry_after {
                if let Ok(value) = wait.as_secs().max(1).to_string().parse() {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            response
        }
    }
}

/// Create invoke routes
pub fn invoke_routes() -> Router<AppState> {
    Router::new().route("/api/v1/invoke", post(invoke))
}
