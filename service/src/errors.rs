use crate::cli::ConfigError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use starter_readiness::PoolError;
use std::fmt::Write as _;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub(crate) enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("datastore pool misconfigured")]
    Pool(#[from] PoolError),
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server stopped")]
    Serve(#[source] std::io::Error),
    #[error("failed to encode metrics")]
    MetricsEncoding(#[from] prometheus::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = &self as &(dyn std::error::Error + 'static), "request failed");
        let mut body = self.to_string();
        let mut source = std::error::Error::source(&self);
        while let Some(cause) = source {
            let _ = write!(body, ": {cause}");
            source = cause.source();
        }
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
