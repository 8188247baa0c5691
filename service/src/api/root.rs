use crate::api::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};
use utoipa::ToSchema;

#[derive(serde::Serialize, ToSchema)]
pub(crate) struct Greeting {
    message: String,
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = OK, description = "Static greeting", body = Greeting)),
    tag = "Root"
)]
pub(crate) async fn root(State(state): State<AppState>) -> Json<Greeting> {
    Json(Greeting {
        message: format!("Hello from {}!", state.service_name),
    })
}

pub(crate) async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" })))
}
