//! Tools API endpoints
//!
//! GET /api/v1/tools - List all registered tools

use axum::extract::State;
use axum::{routing::get, Json, Router};

use super::ApiResponse;
use crate::server::AppState;
use toolgate_core::ToolDescriptor;

/// List all registered tools
async fn list_tools(State(state): State<AppState>) -> Json<ApiResponse<Vec<ToolDescriptor>>> {
    Json(ApiResponse::success(state.engine.registry().descriptors()))
}

/// Create tools routes
pub fn tools_routes() -> Router<AppState> {
    Router::new().route("/api/v1/tools", get(list_tools))
}
