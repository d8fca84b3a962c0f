use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};

/// Handler for Prometheus metrics endpoint
pub async fn metrics_handler(State(registry): State<Registry>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Create metrics router serving `registry`
pub fn create_metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}
