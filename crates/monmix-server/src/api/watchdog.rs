use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn get_watchdog(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "watchdog": state.watchdog().status() }))
}

pub async fn start(State(state): State<AppState>) -> Json<Value> {
    state.watchdog().start();
    Json(json!({ "success": true, "watchdog": state.watchdog().status() }))
}

pub async fn stop(State(state): State<AppState>) -> Json<Value> {
    state.watchdog().stop();
    Json(json!({ "success": true, "watchdog": state.watchdog().status() }))
}
