//! Prometheus metrics endpoint.
//!
//! Exposes the process-wide registry (queue depths, job outcomes,
//! notification counts, credential refresh results — see `crate::metrics`)
//! in Prometheus text format. Deliberately unauthenticated, same as the
//! public resolution API, so a scraper doesn't need an admin session.

use axum::{Router, response::IntoResponse, routing::get};
use prometheus::{Encoder, TextEncoder};

use crate::error::{AppError, Result};
use crate::metrics::REGISTRY;

async fn metrics_handler() -> Result<impl IntoResponse> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode metrics: {e}")))?;

    Ok(([(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())], buffer))
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}
