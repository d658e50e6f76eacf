/// Shared application state for the monitor-mix server.
/// Holds the single console client, the watchdog, the telemetry fan-out
/// and the loaded configuration. Cloned into every axum handler.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::client::ConsoleClient;
use crate::config::ServerConfig;
use crate::fanout::Fanout;
use crate::watchdog::Watchdog;

#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub start_time: Instant,
    pub client: ConsoleClient,
    pub watchdog: Watchdog,
    pub fanout: Arc<Fanout>,
    pub config: RwLock<ServerConfig>,
    /// Path to the TOML config file for persistence
    pub config_path: String,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        config_path: String,
        client: ConsoleClient,
        watchdog: Watchdog,
        fanout: Arc<Fanout>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                start_time: Instant::now(),
                client,
                watchdog,
                fanout,
                config: RwLock::new(config),
                config_path,
            }),
        }
    }

    pub fn client(&self) -> &ConsoleClient {
        &self.inner.client
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.inner.watchdog
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
