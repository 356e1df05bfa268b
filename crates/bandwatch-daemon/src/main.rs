//! # bandwatch
//!
//! Long-running heart-rate monitor for a BLE wearable.
//!
//! This binary provides:
//! - The session supervisor, reconnecting forever until SIGINT/SIGTERM
//! - A read-only status API (`/health`, `/api/status`)
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, without hardware
//! cargo run --package bandwatch-daemon --features mock-bluetooth --bin bandwatch
//!
//! # Production
//! BANDWATCH_ENV=production ./bandwatch
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use bandwatch_core::{Config, SessionSupervisor, SqliteRecorder};
use bandwatch_daemon::state::AppState;
use bandwatch_daemon::{api, logging, wiring};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production(), "bandwatch")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting bandwatch");

    let config = Config::load().context("failed to load configuration")?;
    let recorder = SqliteRecorder::open(&config.storage.database_path)
        .context("failed to open history database")?;
    info!(path = %config.storage.database_path.display(), "recording history");

    let notifier = wiring::build_notifier(&config)?;
    let connector = wiring::build_connector(&config)?;
    let supervisor = Arc::new(SessionSupervisor::new(
        config.clone(),
        connector,
        Arc::new(recorder),
        notifier,
    )?);

    let shutdown = CancellationToken::new();
    let state = AppState::new(config.device.address.clone());
    let tracker = state.track(supervisor.subscribe(), shutdown.clone());

    let server = if config.server.enabled {
        let listener = TcpListener::bind(config.server.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.server.listen))?;
        info!("Listening on {}", config.server.listen);
        let app = api::create_router(state.clone());
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }))
    } else {
        None
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    supervisor.run(shutdown.clone()).await;

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "status API failed"),
            Err(err) => error!(error = %err, "status API task failed"),
        }
    }
    if let Err(err) = tracker.await {
        warn!(error = %err, "status tracker task failed");
    }

    info!("bandwatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
