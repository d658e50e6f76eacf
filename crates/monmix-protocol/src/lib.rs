pub mod command;
pub mod level;
pub mod response;
pub mod status;

/// Line terminator used by the console on both directions.
pub const LINE_ENDING: &str = "\r\n";

/// Gain bounds accepted by the console (dB)
pub const GAIN_MIN_DB: f32 = -60.0;
pub const GAIN_MAX_DB: f32 = 10.0;

/// Meter bounds reported by the console (dB)
pub const VU_MIN_DB: f32 = -60.0;
pub const VU_MAX_DB: f32 = 0.0;

/// Default control port of the console
pub const DEFAULT_CONSOLE_PORT: u16 = 49280;

/// Well-known control ports for this device family, probed during discovery.
pub const CANDIDATE_PORTS: &[u16] = &[23, 4001, 5000, 10001, 49280];

/// Read-only command sent right after a discovery connect.
pub const DISCOVERY_PROBE: &str = "GET PRESET\r\n";

/// Tokens that identify a console in a probe reply (matched case-insensitively).
/// Besides generic acknowledgements and mixer terms this includes the
/// vendor name and the vendor's remote-control protocol token.
pub const DEVICE_KEYWORDS: &[&str] = &[
    "ok", "ack", "gain", "mute", "send", "preset", "matrix", "mixer", "console", "yamaha", "scp",
];

/// Timing defaults
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;

pub use command::{ChannelClass, Command};
pub use level::{clamp_gain, clamp_vu, db_to_level, level_to_db};
pub use response::{ProtocolError, Response, TelemetryReading};
