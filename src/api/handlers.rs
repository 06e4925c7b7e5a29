//! Plain HTTP handlers: liveness and machine listing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use super::ApiState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct MachineListResponse {
    pub machine_list: Vec<String>,
}

/// GET /api/v1/machines - currently connected machines
pub async fn list_machines(State(state): State<ApiState>) -> Response {
    match state.hub.list_machines().await {
        Ok(machine_list) => Json(MachineListResponse { machine_list }).into_response(),
        Err(e) => {
            warn!(error = %e, "Machine list unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "aggregation loop unavailable"})),
            )
                .into_response()
        }
    }
}
