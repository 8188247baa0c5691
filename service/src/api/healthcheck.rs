use crate::api::AppState;
use axum::Json;
use axum::extract::State;
use utoipa::ToSchema;

#[derive(serde::Serialize, ToSchema)]
pub(crate) struct Health {
    status: &'static str,
}

#[derive(serde::Serialize, ToSchema)]
pub(crate) struct Ready {
    ready: bool,
}

#[utoipa::path(
    get,
    path = "/healthz",
    description = "Liveness: answers while the process runs, regardless of the datastore",
    responses((status = OK, description = "Process is alive", body = Health)),
    tag = "Health"
)]
pub(crate) async fn healthz() -> Json<Health> {
    Json(Health { status: "ok" })
}

#[utoipa::path(
    get,
    path = "/readyz",
    description = "Readiness: one connectivity check against the datastore",
    responses((status = OK, description = "Readiness is carried in the body", body = Ready)),
    tag = "Health"
)]
pub(crate) async fn readyz(State(state): State<AppState>) -> Json<Ready> {
    let readiness = state.readiness.check().await;
    Json(Ready {
        ready: readiness.is_ready(),
    })
}
