use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use crate::metrics::PROMETHEUS_REGISTRY;
use crate::model::HealthState;
use crate::observability::Observability;

/// Bind and serve the ambient HTTP surface (`/healthz`, `/readyz`,
/// `/metrics`) until the process is torn down. Runs forever; the caller
/// races it against the shutdown signal.
pub async fn serve(observability: Observability, addr: SocketAddr) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(observability);

    info!(%addr, "health server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// Liveness: degraded still reports 200, only a fully unhealthy process
/// should be restarted by the orchestrator.
async fn healthz(State(obs): State<Observability>) -> impl IntoResponse {
    let status = obs.health().await;
    let code = match status.status {
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(status))
}

/// Readiness: degraded is enough to pull the pod out of rotation.
async fn readyz(State(obs): State<Observability>) -> impl IntoResponse {
    let status = obs.health().await;
    let code = match status.status {
        HealthState::Healthy => StatusCode::OK,
        HealthState::Degraded | HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(status))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain".to_string())], Vec::new());
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer)
}
