pub mod connection;
pub mod mixer;
pub mod network;
pub mod status;
pub mod watchdog;

use axum::routing::{get, post, put};
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::state::AppState;
use crate::websocket;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Service status
        .route("/api/status", get(status::get_status))
        // Console connection
        .route("/api/connection", get(connection::get_connection))
        .route("/api/connection/connect", post(connection::connect))
        .route("/api/connection/disconnect", post(connection::disconnect))
        // Watchdog
        .route("/api/watchdog", get(watchdog::get_watchdog))
        .route("/api/watchdog/start", post(watchdog::start))
        .route("/api/watchdog/stop", post(watchdog::stop))
        // Network discovery
        .route("/api/network", get(network::get_network))
        .route("/api/network/scan", post(network::scan))
        // Mixer
        .route("/api/mixer/gain/:class/:n", get(mixer::get_gain).put(mixer::set_gain))
        .route("/api/mixer/send/:class/:n/:bus", get(mixer::get_send).put(mixer::set_send))
        .route("/api/mixer/mute/:class/:n", put(mixer::set_mute))
        .route("/api/mixer/preset", get(mixer::get_preset).put(mixer::set_preset))
        .route("/api/mixer/vu/:class/:n", get(mixer::get_vu))
        // Telemetry stream
        .route("/ws/telemetry", get(websocket::ws_telemetry_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Uniform failure body.
pub(crate) fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}
