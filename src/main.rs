//! Movesync Server - Authoritative movement server
//!
//! Players connect over WebSocket and stream inputs; a fixed-rate loop
//! replays them against block collision, refines the result against the
//! mesh mirror, and sends snapshots back. `/health` and `/stats` expose
//! liveness and tick counters.

mod app;
mod config;
mod game;
mod http;
mod mirror;
mod util;
mod world;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    init_server_time();

    info!(
        tick_rate = config.tick_rate,
        mesh_refinement = config.mesh_refinement,
        predict_by_default = config.predict_by_default,
        "Starting Movesync Server"
    );

    let state = AppState::new(config.clone());

    // The simulation owns its own interval; stop it once the listener is gone
    let sim = state.sim.clone();
    let sim_task = tokio::spawn(sim.run());

    let router = build_router(state.clone());
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {} (ws://{}/ws, http://{}/stats)", addr, addr, addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sim_task.abort();
    let stats = state.sim.stats();
    info!(
        ticks = stats.ticks,
        snapshots_sent = stats.snapshots_sent,
        snapshots_dropped = stats.snapshots_dropped,
        "Server shutdown complete"
    );
    Ok(())
}

/// Env filter from RUST_LOG, falling back to the configured level
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
