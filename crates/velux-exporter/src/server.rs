//! HTTP endpoint: `/metrics` for Prometheus, `/healthz` for liveness probes.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use velux_core::MetricsState;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(metrics: Arc<MetricsState>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(metrics)
}

/// Serve until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<MetricsState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn prometheus_metrics(State(metrics): State<Arc<MetricsState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        metrics.render(),
    )
}

/// 200 once any cycle has succeeded; stale data still counts as healthy.
async fn healthz(State(metrics): State<Arc<MetricsState>>) -> impl IntoResponse {
    if metrics.snapshot().last_success.is_some() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for first successful poll")
    }
}
