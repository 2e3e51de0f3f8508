//! kwh-ledger server entry point.
//!
//! Serves the ledger REST API, backed by PostgreSQL when
//! `PERSISTENCE_ENABLED` is set and by the in-memory store otherwise.

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kwh_ledger::api;
use kwh_ledger::app_state::AppState;
use kwh_ledger::config::LedgerConfig;
use kwh_ledger::persistence::{LedgerStore, MemoryLedgerStore, PostgresLedgerStore};
use kwh_ledger::service::LedgerService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LedgerConfig::from_env()?;
    tracing::info!(
        addr = %config.listen_addr,
        persistence = config.persistence_enabled,
        undo_window_hours = config.undo_window_hours,
        "starting kwh-ledger"
    );

    let store: Arc<dyn LedgerStore> = if config.persistence_enabled {
        Arc::new(PostgresLedgerStore::connect(&config).await?)
    } else {
        tracing::warn!("persistence disabled, events are kept in memory only");
        Arc::new(MemoryLedgerStore::new())
    };

    let state = AppState {
        ledger_service: Arc::new(LedgerService::from_config(store, &config)),
    };
    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM under Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
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
    tracing::info!("shutdown signal received, draining connections");
}
