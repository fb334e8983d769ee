//! Health and metrics listener
//!
//! Runs on `crawler.metrics_addr` when configured. Endpoints:
//! - GET /health: pool health JSON, 503 when no token can come back
//! - GET /metrics: Prometheus text exposition

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use token_pool::TokenPool;

/// Shared state for the admin handlers
#[derive(Clone)]
pub struct AdminState {
    pub pool: Option<Arc<TokenPool>>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let mut body = match &state.pool {
        Some(pool) => pool.health().await,
        None => serde_json::json!({ "status": "healthy", "tokens_total": 0 }),
    };
    body["uptime_seconds"] = state.started_at.elapsed().as_secs().into();

    let status_code = if body["status"] == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}
