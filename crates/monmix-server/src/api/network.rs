use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::failure;
use crate::scanner::{self, ScanOptions};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    /// `/24` prefix such as `192.168.1`
    pub subnet: Option<String>,
    pub ports: Option<Vec<u16>>,
}

pub async fn get_network(State(state): State<AppState>) -> Json<Value> {
    let config = state.inner.config.read().await;
    Json(json!({ "network": scanner::network_info(&config.scanner.ports) }))
}

pub async fn scan(
    State(state): State<AppState>,
    body: Option<Json<ScanRequest>>,
) -> Json<Value> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let mut options = ScanOptions::from(&state.inner.config.read().await.scanner);
    options.subnet = request.subnet;
    if let Some(ports) = request.ports.filter(|p| !p.is_empty()) {
        options.ports = ports;
    }

    info!(subnet = ?options.subnet, ports = ?options.ports, "Network scan requested");
    match scanner::scan(&options).await {
        Ok(results) => {
            let targets = results.iter().filter(|r| r.is_target_device).count();
            Json(json!({
                "success": true,
                "found": results.len(),
                "targets": targets,
                "results": results,
            }))
        }
        Err(e) => Json(failure(e)),
    }
}
