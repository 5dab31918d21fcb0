//! # Question Box Reaction Server
//!
//! Serves the live reaction stream (`GET /api/sse`) and the reaction endpoint
//! (`POST /api/question/{id}/emoji`). Every accepted reaction is persisted and
//! then pushed as a full snapshot of the question's counts to every connected
//! stream.
//!
//! ## Key Features:
//! - **Storage**: PostgreSQL through `deadpool-postgres` when a database URL is
//!   configured, otherwise an in-memory store seeded with question ids.
//! - **Configurable**: defaults, then `server_qbox.conf`, then `QBOX_*`
//!   environment variables and command-line flags.
//! - **Structured Logging**: `tracing` to console and to a file in the log
//!   directory.
//! - **Graceful Shutdown**: Ctrl-C or SIGTERM closes the hub, which ends every
//!   open stream, then the server drains.

use anyhow::Result;
use tokio::signal;

mod qbox_logic;
use qbox_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    let config = config::load_config();
    let _log_guard = logger::setup_logging(&config.log_dir(), config.log_level())?;

    let app_state = state::AppState::from_config(&config).await?;
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let mut downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            tracing::info!("SIGTERM received, initiating shutdown.");
        }
        result = &mut downstream_handle => {
            app_state.hub.close();
            return report(result);
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    report(downstream_handle.await)?;

    tracing::info!(
        subscribers = app_state.hub.subscriber_count(),
        "Shutdown complete."
    );
    Ok(())
}

fn report(result: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::error!("Downstream server failed: {:#}", e);
            Err(e)
        }
        Err(e) => {
            tracing::error!("Downstream task panicked: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            tracing::warn!("Could not install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
