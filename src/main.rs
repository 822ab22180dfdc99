//! Arena Server - Authoritative multiplayer arena game server
//!
//! This is the main entry point for the game server. It handles:
//! - The fixed-rate simulation tick (physics, hit-scan combat, respawns)
//! - State broadcasts to every connected client
//! - WebSocket connections for real-time gameplay
//! - An HTTP health endpoint

mod app;
mod collision;
mod config;
mod game;
mod http;
mod util;
mod ws;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::collision::arena::{default_arena, default_spawn_points};
use crate::config::{Config, LogFormat};
use crate::game::broadcast::BroadcastLoop;
use crate::game::{TickScheduler, WorldState};
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_format);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Arena Server");
    info!("Server address: {}", config.server_addr);

    // Build the world
    let geometry = Arc::new(default_arena()?);
    info!(triangles = geometry.triangle_count(), "Arena geometry loaded");

    let seed: u64 = rand::thread_rng().gen();
    let world = WorldState::new(
        Arc::new(config.sim.clone()),
        geometry,
        default_spawn_points(),
        seed,
    )?;

    // Spawn the tick task and the broadcaster
    let (scheduler, server) = TickScheduler::new(world, &config.net);
    let broadcaster = BroadcastLoop::new(
        server.outbox(),
        server.broadcaster(),
        config.sim.broadcast_rate,
    );
    let mut tick_task = tokio::spawn(scheduler.run());
    tokio::spawn(broadcaster.run());

    // Create application state and router
    let addr: SocketAddr = config.server_addr;
    let state = AppState::new(config, server);
    let router = build_router(state);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let serve = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = serve => {
            result?;
        }
        result = &mut tick_task => {
            // the tick loop only ends on corrupt state; let the supervisor restart us
            match result? {
                Ok(()) => info!("Tick loop finished"),
                Err(violation) => {
                    error!(error = %violation, "World invariant violated, shutting down");
                    return Err(violation.into());
                }
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
    }
}

/// Graceful shutdown signal handler
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
