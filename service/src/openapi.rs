use crate::api::healthcheck::{__path_healthz, __path_readyz};
use crate::api::root::__path_root;
use crate::api::telemetry::__path_prometheus_metrics;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(paths(root, healthz, readyz, prometheus_metrics))]
pub(crate) struct ApiDoc;
