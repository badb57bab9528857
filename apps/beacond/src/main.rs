//! # beacond
//!
//! The Beacon Hub synchronization daemon.
//!
//! ## Process Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            beacond                                      │
//! │                                                                         │
//! │  config (agent.toml + env) ──► Database (SQLite) ──► CloudClient       │
//! │                                      │                                  │
//! │            ┌─────────────────────────┼──────────────────────┐          │
//! │            ▼                         ▼                      ▼          │
//! │        HubAgent              Reconciler scheduler      Connectivity    │
//! │     (heartbeat + poll)      (fixed-interval batches)     (status log)  │
//! │                                                                         │
//! │  Ctrl+C / SIGTERM → agent.stop() → pool close → exit                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One instance of each component per process; a hub owns its queue and its
//! credentials alone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beacon_db::{Database, DbConfig};
use beacon_sync::{AgentConfig, CloudClient, ConnectivityOracle, HubAgent, Reconciler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity; default to info for our crates
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting beacond");

    // Optional config path as the sole positional argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AgentConfig::load_or_default(config_path);
    info!(
        cloud_url = %config.cloud.base_url,
        configured = config.is_configured(),
        "Configuration loaded"
    );

    if let Some(parent) = config.storage.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(DbConfig::new(&config.storage.database_path)).await?;
    info!("Database ready");

    let cloud = Arc::new(CloudClient::new(&config)?);

    // Advisory connectivity status at startup, for the logs
    let oracle = ConnectivityOracle::new(cloud.clone());
    if oracle.force_check().await {
        info!("Cloud is reachable");
    } else {
        warn!("Cloud is unreachable, operating offline");
    }

    let agent = Arc::new(HubAgent::new(config.clone(), cloud.clone(), db.clone()));
    agent.start().await?;

    // The reconciler's external scheduler: a fixed-interval loop
    let reconciler = Reconciler::new(
        cloud,
        db.operation_queue(),
        config.credentials(),
        config.agent.batch_size,
    );
    reconciler.recover_interrupted().await?;

    let shutdown = CancellationToken::new();
    let scheduler = {
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs(config.agent.reconcile_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match reconciler.process_batch().await {
                    Ok(outcome) if outcome.processed > 0 => {
                        info!(
                            completed = outcome.completed,
                            failed = outcome.failed,
                            "Reconciled queued operations"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Reconciler batch errored"),
                }
            }
        })
    };

    shutdown_signal().await;

    info!("Shutting down");
    shutdown.cancel();
    let _ = scheduler.await;
    agent.stop().await;
    db.close().await;

    info!("beacond stopped");
    Ok(())
}

/// Completes on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
