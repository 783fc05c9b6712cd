//! Web API for the toolgate gateway
//!
//! Endpoints:
//! - `POST /api/v1/invoke` - execute a tool call
//! - `GET  /api/v1/tools`  - list registered tools
//! - `GET  /health`        - liveness probe

pub mod health;
pub mod invoke;
pub mod tools;

use axum::Router;
use serde::Serialize;

use crate::server::AppState;

/// Standard envelope for API responses
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<T> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Create the API router with all endpoints
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(health::health_routes())
        .merge(invoke::invoke_routes())
        .merge(tools::tools_routes())
        .with_state(state)
}
