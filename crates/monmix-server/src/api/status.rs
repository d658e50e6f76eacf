use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let connection = state.client().status();
    let watchdog = state.watchdog().status();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_secs(),
        "connected": connection.connected,
        "simulated": connection.config.simulated,
        "console": connection.config.address(),
        "pending_commands": connection.pending_commands,
        "last_error": connection.last_error,
        "watchdog_state": watchdog.state,
        "watchdog_attempts": watchdog.attempts,
        "subscribers": state.inner.fanout.subscriber_count(),
    }))
}
