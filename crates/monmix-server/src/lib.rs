pub mod api;
pub mod client;
pub mod config;
pub mod fanout;
pub mod scanner;
pub mod state;
pub mod watchdog;
pub mod websocket;

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
