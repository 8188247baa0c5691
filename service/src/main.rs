mod api;
mod cli;
mod errors;
mod metrics;
mod openapi;
mod telemetry;

use crate::api::{AppState, app};
use crate::cli::Cli;
use crate::errors::AppError;
use crate::telemetry::init_telemetry;
use clap::Parser;
use starter_readiness::{DatastorePool, ReadinessProbe};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    // Exits with a usage error before anything else when DATABASE_URL is missing.
    let cfg = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.workers.max(1))
        .enable_all()
        .build()?;

    // Held until `main` returns so a fatal error below is still exported.
    let _telemetry = runtime.block_on(async { init_telemetry(cfg.otlp_endpoint.as_deref()) })?;

    runtime.block_on(run(cfg)).inspect_err(|err| {
        error!(error = err as &(dyn std::error::Error + 'static), "server failed");
    })?;
    Ok(())
}

async fn run(cfg: Cli) -> Result<(), AppError> {
    info!(?cfg, "starting server");
    cfg.validate()?;

    let listener = TcpListener::bind(&cfg.bind_addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: cfg.bind_addr.clone(),
            source,
        })?;

    let pool = DatastorePool::connect_lazy(&cfg.pool_config())?;
    let readiness = ReadinessProbe::new(Arc::new(pool.clone()), cfg.readiness_timeout());
    let state = AppState {
        service_name: Arc::from(cfg.service_name.as_str()),
        readiness: Arc::new(readiness),
    };
    info!(addr = %cfg.bind_addr, "listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let served = axum::serve(listener, app(state, cfg.request_timeout()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(AppError::Serve);

    pool.close().await;
    served?;
    info!("server stopped");
    Ok(())
}

/// Cancels `token` on the first SIGTERM or Ctrl-C.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }

    info!("shutdown signal received, draining connections");
    token.cancel();
}
