//! HTTP/WebSocket surface using Axum
//!
//! - `GET /health` liveness
//! - `GET /api/v1/machines` connected machine list
//! - `GET /api/v1/machines/:name/ws` live namespace stream

pub mod handlers;
mod routes;
pub mod ws;

use axum::http::{header, Method};
use axum::Router;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{defaults, ServerConfig};
use crate::fanout::HubHandle;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Command handle to the fan-out hub owned by the aggregation task
    pub hub: HubHandle,
    /// WebSocket keepalive ping period
    pub ping_interval: Duration,
}

impl ApiState {
    pub fn new(hub: HubHandle) -> Self {
        Self {
            hub,
            ping_interval: Duration::from_secs(defaults::WS_PING_INTERVAL_SECS),
        }
    }
}

/// Build a CORS layer that is restrictive by default (same-origin only).
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);
    if origins.is_empty() {
        return layer;
    }
    let allowed: Vec<_> = origins.iter().filter_map(|o| o.trim().parse().ok()).collect();
    tracing::info!(origins = ?origins, "CORS: allowing configured origins");
    layer.allow_origin(allowed)
}

/// Create the complete application router.
pub fn create_app(state: ApiState, server: &ServerConfig) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .merge(routes::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&server.cors_origins))
}
