/// Status types shared between the server and the CLI.
///
/// The server serves these as JSON over its command surface; the CLI
/// deserializes them for display.

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CONSOLE_PORT,
    DEFAULT_RECONNECT_INTERVAL_MS,
};

/// Socket type used to reach the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// TCP
    #[default]
    Stream,
    /// UDP
    Datagram,
}

/// Parameters for a console connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub transport: Transport,
    /// Run against the built-in simulator instead of real hardware
    #[serde(default)]
    pub simulated: bool,
    /// Delay between the client's own reconnect tries; 0 disables them
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String { "192.168.0.128".to_string() }
fn default_port() -> u16 { DEFAULT_CONSOLE_PORT }
fn default_reconnect_interval() -> u64 { DEFAULT_RECONNECT_INTERVAL_MS }
fn default_command_timeout() -> u64 { DEFAULT_COMMAND_TIMEOUT_MS }
fn default_connect_timeout() -> u64 { DEFAULT_CONNECT_TIMEOUT_MS }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: Transport::Stream,
            simulated: false,
            reconnect_interval_ms: default_reconnect_interval(),
            command_timeout_ms: default_command_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl ConnectionConfig {
    /// Configuration for the built-in simulator.
    pub fn simulated() -> Self {
        Self {
            host: "simulator".to_string(),
            simulated: true,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Snapshot of the console connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub config: ConnectionConfig,
    /// Commands currently awaiting a reply
    pub pending_commands: usize,
    pub last_error: Option<String>,
}

/// Reconnection watchdog state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Idle,
    Watching,
    Connecting,
    Connected,
    Stopped,
}

impl WatchdogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watchdog snapshot served by the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub state: WatchdogState,
    pub attempts: u32,
    /// Unix timestamp in milliseconds
    pub last_attempt_ms: Option<u64>,
    /// Unix timestamp in milliseconds
    pub next_attempt_ms: Option<u64>,
    pub last_error: Option<String>,
    pub current_interval_ms: u64,
}

/// One open port found by a discovery scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub host: String,
    pub port: u16,
    pub is_target_device: bool,
    /// First bytes of the probe reply (lossy UTF-8)
    pub response: Option<String>,
    pub latency_ms: u64,
}

/// Local network facts used to pre-fill a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub server_ip: Option<String>,
    /// `/24` prefix, e.g. `192.168.1`
    pub subnet: Option<String>,
    pub candidate_ports: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_defaults_from_partial_toml_fields() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{"host":"10.0.0.5","transport":"datagram"}"#).unwrap();
        assert_eq!(cfg.host, "10.0.0.5");
        assert_eq!(cfg.port, DEFAULT_CONSOLE_PORT);
        assert_eq!(cfg.transport, Transport::Datagram);
        assert!(!cfg.simulated);
        assert_eq!(cfg.command_timeout_ms, DEFAULT_COMMAND_TIMEOUT_MS);
    }

    #[test]
    fn test_watchdog_state_serializes_snake_case() {
        let json = serde_json::to_string(&WatchdogState::Connecting).unwrap();
        assert_eq!(json, "\"connecting\"");
        assert_eq!(WatchdogState::Stopped.to_string(), "stopped");
    }
}
