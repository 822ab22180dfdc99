//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.client_origin))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `*` allows any origin, otherwise a comma-separated list
fn allowed_origins(client_origin: &str) -> AllowOrigin {
    if client_origin.trim() == "*" {
        return AllowOrigin::from(Any);
    }

    let origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    AllowOrigin::list(origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    tick: u64,
    players: usize,
    max_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.server.stats();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        tick: stats.tick(),
        players: stats.players(),
        max_players: state.server.max_players(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NetConfig, SimConfig};
    use crate::game::world::tests::arena_world;
    use crate::game::TickScheduler;

    #[tokio::test]
    async fn health_reports_tick_and_capacity() {
        let config = Config::from_lookup(|_| None).unwrap();
        let (mut scheduler, handle) = TickScheduler::new(
            arena_world(SimConfig {
                max_players: 4,
                ..SimConfig::default()
            }),
            &NetConfig::default(),
        );
        scheduler.step().unwrap();
        scheduler.step().unwrap();

        let Json(health) = health_handler(State(AppState::new(config, handle))).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.tick, 2);
        assert_eq!(health.players, 0);
        assert_eq!(health.max_players, 4);
    }

    #[test]
    fn router_builds_with_explicit_origins() {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.client_origin = "http://localhost:5173, https://arena.example".to_string();
        let (_scheduler, handle) =
            TickScheduler::new(arena_world(SimConfig::default()), &NetConfig::default());

        let _router = build_router(AppState::new(config, handle));
    }
}
