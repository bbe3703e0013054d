//! Arena Duel Client - peer-synchronized two-player duel over a shared document
//!
//! Runs headless bot duels. With the memory backend two bots fight over an
//! in-process document; with the realtime database backend one bot joins a
//! hosted room and plays whoever else shows up.

mod app;
mod config;
mod game;
mod store;
mod util;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::{Config, StoreBackendKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    info!("Starting Arena Duel Client");
    match &config.backend {
        StoreBackendKind::Memory => info!(room = %config.room_code, "Using in-process document, local bot duel"),
        StoreBackendKind::Rtdb { url, .. } => info!(room = %config.room_code, url = %url, "Using realtime database"),
    }

    let state = AppState::new(config);
    app::run(state, shutdown_signal()).await?;

    info!("Client shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, leaving match");
        }
        _ = terminate => {
            info!("Received terminate signal, leaving match");
        }
    }
}
