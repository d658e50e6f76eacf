/// Inbound console lines.
///
/// The console answers queries with `<KEYWORD ...> = <value>` lines and pushes
/// meter readings as `VU <class> <n> = <dB>` (optionally followed by
/// `PEAK <dB>`). Lines carry no request id, so the caller is responsible for
/// matching replies to commands.

use serde::{Deserialize, Serialize};

use crate::command::ChannelClass;
use crate::level::clamp_vu;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown channel class: {0}")]
    UnknownChannelClass(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed line: {0}")]
    Malformed(String),

    #[error("console rejected command: {0}")]
    Rejected(String),
}

/// A single meter reading for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub class: ChannelClass,
    pub channel: u16,
    pub level_db: f32,
    pub peak_db: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `VU <class> <n> = <dB> [PEAK <dB>]`
    Meter(TelemetryReading),
    /// `PRESET = <n>`
    Preset(u16),
    /// `OK ...` acknowledgement
    Ack,
    /// `ERR ...` / `ERROR ...`
    Error(String),
    /// Anything else; numeric suffix extracted on demand.
    Line(String),
}

impl Response {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let upper = line.to_ascii_uppercase();

        if upper.starts_with("ERR") {
            let msg = line
                .split_once(char::is_whitespace)
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or_default();
            return Self::Error(msg);
        }
        if upper == "OK" || upper.starts_with("OK ") || upper == "ACK" {
            return Self::Ack;
        }
        if upper.starts_with("VU ") {
            if let Some(reading) = parse_meter(line) {
                return Self::Meter(reading);
            }
        }
        if upper.starts_with("PRESET") {
            if let Some(n) = numeric_suffix(line).filter(|v| *v >= 0.0) {
                return Self::Preset(n as u16);
            }
        }
        Self::Line(line.to_string())
    }

    /// Numeric value carried by this reply, if any.
    pub fn value(&self) -> Option<f32> {
        match self {
            Self::Meter(r) => Some(r.level_db),
            Self::Preset(n) => Some(*n as f32),
            Self::Line(l) => numeric_suffix(l),
            Self::Ack | Self::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Value after the last `=` in a line, e.g. `GAIN IN 1 = -10.0` → -10.0.
pub fn numeric_suffix(line: &str) -> Option<f32> {
    let (_, value) = line.rsplit_once('=')?;
    value
        .split_whitespace()
        .next()?
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_meter(line: &str) -> Option<TelemetryReading> {
    let (head, tail) = line.split_once('=')?;
    let mut head = head.split_whitespace();
    head.next()?; // VU
    let class: ChannelClass = head.next()?.parse().ok()?;
    let channel: u16 = head.next()?.parse().ok()?;

    let mut tail = tail.split_whitespace();
    let level_db = clamp_vu(tail.next()?.parse().ok()?);
    let peak_db = match (tail.next(), tail.next()) {
        (Some(tag), Some(v)) if tag.eq_ignore_ascii_case("PEAK") => {
            v.parse::<f32>().map(clamp_vu).unwrap_or(level_db)
        }
        _ => level_db,
    };

    Some(TelemetryReading {
        class,
        channel,
        level_db,
        peak_db: peak_db.max(level_db),
    })
}

/// Render a reading the way the console pushes it.
pub fn encode_meter(reading: &TelemetryReading) -> String {
    format!(
        "VU {} {} = {:.1} PEAK {:.1}",
        reading.class, reading.channel, reading.level_db, reading.peak_db
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meter_line() {
        let r = Response::parse("VU IN 3 = -20.5\r\n");
        assert_eq!(
            r,
            Response::Meter(TelemetryReading {
                class: ChannelClass::Input,
                channel: 3,
                level_db: -20.5,
                peak_db: -20.5,
            })
        );
    }

    #[test]
    fn test_parse_meter_with_peak() {
        match Response::parse("VU OUT 2 = -30.0 PEAK -12.0") {
            Response::Meter(r) => {
                assert_eq!(r.class, ChannelClass::Output);
                assert_eq!(r.level_db, -30.0);
                assert_eq!(r.peak_db, -12.0);
            }
            other => panic!("expected meter, got {:?}", other),
        }
    }

    #[test]
    fn test_meter_values_are_clamped() {
        match Response::parse("VU STIN 1 = 3.0") {
            Response::Meter(r) => assert_eq!(r.level_db, 0.0),
            other => panic!("expected meter, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_preset() {
        assert_eq!(Response::parse("PRESET = 7"), Response::Preset(7));
    }

    #[test]
    fn test_parse_ack_and_error() {
        assert_eq!(Response::parse("OK"), Response::Ack);
        assert_eq!(Response::parse("ok SET GAIN IN 1"), Response::Ack);
        assert_eq!(
            Response::parse("ERR unknown command"),
            Response::Error("unknown command".to_string())
        );
        assert!(Response::parse("ERROR").is_error());
    }

    #[test]
    fn test_numeric_suffix() {
        assert_eq!(numeric_suffix("GAIN IN 1 = -10.0"), Some(-10.0));
        assert_eq!(numeric_suffix("SEND IN 2 OUT 5 = -15.0"), Some(-15.0));
        assert_eq!(numeric_suffix("GAIN IN 1 = loud"), None);
        assert_eq!(numeric_suffix("no value here"), None);
        assert_eq!(Response::parse("GAIN IN 1 = -4.5").value(), Some(-4.5));
    }

    #[test]
    fn test_encode_meter_parses_back() {
        let reading = TelemetryReading {
            class: ChannelClass::StereoInput,
            channel: 2,
            level_db: -18.0,
            peak_db: -9.0,
        };
        assert_eq!(Response::parse(&encode_meter(&reading)), Response::Meter(reading));
    }
}
