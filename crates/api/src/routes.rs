//! HTTP handlers and the error-to-status mapping.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use proxbridge_common::{BridgeError, ErrorInfo};
use proxbridge_tools::ToolRequest;
use serde_json::{json, Map, Value};

pub struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::ToolNotFound { .. } | BridgeError::NodeUnknown { .. } => {
                StatusCode::NOT_FOUND
            }
            BridgeError::InvalidArguments { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::NodeUnreachable { .. } => StatusCode::BAD_GATEWAY,
            BridgeError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({"error": ErrorInfo::from(&self.0)}));
        (status, body).into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let degraded = state.manager.degraded();
    Json(json!({
        "status": if degraded.is_empty() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "phase": state.manager.phase(),
        "uptime_secs": state.uptime_secs(),
        "degraded_listeners": degraded,
    }))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"tools": state.manager.catalog()}))
}

pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Map<String, Value>>>,
) -> Result<Json<Value>, ApiError> {
    let arguments = body.map(|Json(map)| map).unwrap_or_default();
    let request = ToolRequest::new(name, arguments);
    let response = state.manager.invoke_tool(&request).await?;
    Ok(Json(serde_json::to_value(response).map_err(BridgeError::from)?))
}

pub async fn list_nodes(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"nodes": state.manager.node_statuses()}))
}

pub async fn self_test(State(state): State<AppState>) -> Response {
    let report = state.manager.self_test().await;
    let status = if report.passed() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({"passed": report.passed(), "checks": report.checks}))).into_response()
}
