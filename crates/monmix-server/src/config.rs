/// TOML configuration for the server.
///
/// Holds the console connection parameters together with the tuning of the
/// watchdog, telemetry relay and discovery scanner. A manual connect from
/// the command surface writes the `[console]` section back to disk.

use std::path::Path;

use serde::{Deserialize, Serialize};

use monmix_protocol::status::ConnectionConfig;
use monmix_protocol::CANDIDATE_PORTS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub console: ConnectionConfig,
    #[serde(default)]
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub scanner: ScannerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSection {
    #[serde(default = "default_base_interval")]
    pub base_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
    /// Start watching as soon as the server is up
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval(),
            max_interval_secs: default_max_interval(),
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Input channel numbers polled for VU
    #[serde(default = "default_input_channels")]
    pub input_channels: Vec<u16>,
    /// Output (bus) channel numbers polled for VU
    #[serde(default = "default_output_channels")]
    pub output_channels: Vec<u16>,
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            input_channels: default_input_channels(),
            output_channels: default_output_channels(),
            liveness_interval_secs: default_liveness_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSection {
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Parallel connect attempts per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            connect_timeout_ms: default_connect_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_true() -> bool { true }
fn default_base_interval() -> u64 { 30 }
fn default_max_interval() -> u64 { 300 }
fn default_poll_interval() -> u64 { 100 }
fn default_input_channels() -> Vec<u16> { (1..=16).collect() }
fn default_output_channels() -> Vec<u16> { (1..=8).collect() }
fn default_liveness_interval() -> u64 { 15 }
fn default_ports() -> Vec<u16> { CANDIDATE_PORTS.to_vec() }
fn default_connect_timeout() -> u64 { 600 }
fn default_probe_timeout() -> u64 { 800 }
fn default_batch_size() -> usize { 64 }

/// Load a ServerConfig from a TOML file on disk.
pub fn load_config(path: &str) -> anyhow::Result<ServerConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Save a ServerConfig to a TOML file on disk.
/// Creates parent directories if needed. Overwrites any existing file.
pub fn save_config(path: &str, config: &ServerConfig) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monmix_protocol::status::Transport;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.watchdog.base_interval_secs, 30);
        assert_eq!(cfg.watchdog.max_interval_secs, 300);
        assert_eq!(cfg.telemetry.poll_interval_ms, 100);
        assert_eq!(cfg.scanner.connect_timeout_ms, 600);
        assert_eq!(cfg.scanner.ports, CANDIDATE_PORTS.to_vec());
        assert!(!cfg.console.simulated);
    }

    #[test]
    fn test_partial_console_section() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            [console]
            host = "10.1.1.20"
            transport = "datagram"
            simulated = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.console.host, "10.1.1.20");
        assert_eq!(cfg.console.transport, Transport::Datagram);
        assert!(cfg.console.simulated);
        assert_eq!(cfg.telemetry.input_channels.len(), 16);
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("monmix-config-{}", std::process::id()));
        let path = dir.join("monmix.toml");
        let path = path.to_string_lossy().to_string();

        let mut cfg = ServerConfig::default();
        cfg.console.host = "172.16.0.9".to_string();
        cfg.console.port = 4001;
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.console.host, "172.16.0.9");
        assert_eq!(loaded.console.port, 4001);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
