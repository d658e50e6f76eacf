use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use monmix_protocol::status::{ConnectionConfig, Transport};

use super::failure;
use crate::config::save_config;
use crate::state::AppState;

/// Connection parameters to change before connecting. Absent fields keep
/// their current value.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<Transport>,
    pub simulated: Option<bool>,
    pub reconnect_interval_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

impl ConnectRequest {
    fn apply(self, config: &mut ConnectionConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(simulated) = self.simulated {
            config.simulated = simulated;
        }
        if let Some(ms) = self.reconnect_interval_ms {
            config.reconnect_interval_ms = ms;
        }
        if let Some(ms) = self.command_timeout_ms {
            config.command_timeout_ms = ms;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
    }
}

pub async fn get_connection(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "connection": state.client().status() }))
}

/// Connect, optionally with new parameters. A manual connect takes over
/// from the watchdog; the watchdog resumes once the link is up.
pub async fn connect(
    State(state): State<AppState>,
    body: Option<Json<ConnectRequest>>,
) -> Json<Value> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state.watchdog().stop();

    let current = state.client().config();
    let mut next = current.clone();
    request.apply(&mut next);

    if next != current {
        state.client().reconfigure(next.clone()).await;
        let mut config = state.inner.config.write().await;
        config.console = next.clone();
        match save_config(&state.inner.config_path, &config) {
            Ok(()) => info!(path = %state.inner.config_path, "Console settings saved"),
            Err(e) => warn!(path = %state.inner.config_path, error = %e, "Failed to save console settings"),
        }
    }

    match state.client().connect().await {
        Ok(()) => Json(json!({
            "success": true,
            "connection": state.client().status(),
        })),
        Err(e) => Json(failure(e)),
    }
}

pub async fn disconnect(State(state): State<AppState>) -> Json<Value> {
    state.watchdog().stop();
    state.client().disconnect().await;
    Json(json!({
        "success": true,
        "connection": state.client().status(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_keeps_absent_fields() {
        let mut config = ConnectionConfig::default();
        let request: ConnectRequest =
            serde_json::from_str(r#"{"host":"10.0.0.9","transport":"datagram"}"#).unwrap();
        request.apply(&mut config);

        assert_eq!(config.host, "10.0.0.9");
        assert_eq!(config.transport, Transport::Datagram);
        assert_eq!(config.port, ConnectionConfig::default().port);
        assert!(!config.simulated);
    }
}
