use crate::errors::AppError;
use axum::http::header;
use axum::response::IntoResponse;
use prometheus::{Encoder, TextEncoder, default_registry};

#[utoipa::path(
    get,
    path = "/metrics",
    description = "Prometheus metrics",
    responses((status = OK, description = "Text exposition format", body = String)),
    tag = "Telemetry"
)]
pub(crate) async fn prometheus_metrics() -> Result<impl IntoResponse, AppError> {
    let metric_families = default_registry().gather();
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
        buffer,
    ))
}
