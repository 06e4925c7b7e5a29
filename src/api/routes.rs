//! API route definitions

use axum::{routing::get, Router};

use super::{handlers, ws, ApiState};

/// Machine listing and per-machine WebSocket namespaces.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/machines", get(handlers::list_machines))
        .route("/machines/:name/ws", get(ws::machine_ws))
        .with_state(state)
}

/// Root-level liveness endpoint
pub fn health_routes() -> Router {
    Router::new().route("/health", get(handlers::health_check))
}
