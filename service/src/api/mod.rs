use crate::api::healthcheck::{healthz, readyz};
use crate::api::root::{not_found, root};
use crate::api::telemetry::prometheus_metrics;
use crate::metrics::track_requests;
use crate::openapi::ApiDoc;
use axum::routing::get;
use axum::{Json, Router, middleware};
use starter_readiness::ReadinessProbe;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub(crate) mod healthcheck;
pub(crate) mod root;
pub(crate) mod telemetry;

#[derive(Clone)]
pub(crate) struct AppState {
    pub service_name: Arc<str>,
    pub readiness: Arc<ReadinessProbe>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(prometheus_metrics))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .fallback(not_found)
}

/// The router with its middleware stack, ready to serve.
pub(crate) fn app(state: AppState, request_timeout: Duration) -> Router {
    router()
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(track_requests))
                .layer(TimeoutLayer::new(request_timeout))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
