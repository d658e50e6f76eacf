//! Integration tests for the monmix-protocol crate.
//!
//! These tests exercise the public API across module boundaries: command
//! lines as they go on the wire, the reply lines a console sends back, and
//! the level conversions the UI relies on.

use monmix_protocol::response::{encode_meter, numeric_suffix};
use monmix_protocol::status::{ConnectionConfig, Transport, WatchdogState, WatchdogStatus};
use monmix_protocol::{
    clamp_gain, db_to_level, level_to_db, ChannelClass, Command, ProtocolError, Response,
    TelemetryReading, CANDIDATE_PORTS, DEFAULT_CONSOLE_PORT,
};

// ---------------------------------------------------------------------------
// 1. Command lines on the wire
// ---------------------------------------------------------------------------

#[test]
fn every_command_ends_with_crlf() {
    let commands = [
        Command::SetGain { class: ChannelClass::Input, channel: 1, db: -3.0 },
        Command::GetGain { class: ChannelClass::Output, channel: 8 },
        Command::SetMute { class: ChannelClass::StereoInput, channel: 2, muted: true },
        Command::GetVu { class: ChannelClass::Input, channel: 16 },
        Command::SetPreset { preset: 12 },
        Command::GetPreset,
        Command::SetSend { class: ChannelClass::Input, channel: 2, bus: 5, db: -15.0 },
        Command::GetSend { class: ChannelClass::Input, channel: 2, bus: 5 },
    ];
    for command in &commands {
        let line = command.encode();
        assert!(line.ends_with("\r\n"), "{:?}", line);
        assert_eq!(line.matches("\r\n").count(), 1);
    }
}

#[test]
fn out_of_range_gain_is_clamped_before_sending() {
    let loud = Command::SetGain { class: ChannelClass::Input, channel: 1, db: 42.0 };
    assert_eq!(loud.encode(), "SET GAIN IN 1 = 10.0\r\n");

    let quiet = Command::SetSend { class: ChannelClass::StereoInput, channel: 3, bus: 1, db: -200.0 };
    assert_eq!(quiet.encode(), "SET SEND STIN 3 OUT 1 = -60.0\r\n");
}

#[test]
fn console_parses_what_the_client_sends() {
    let sent = Command::SetMute { class: ChannelClass::Output, channel: 4, muted: false };
    let parsed: Command = sent.encode().parse().unwrap();
    assert_eq!(parsed, sent);

    match "FADE IN 1 = 3".parse::<Command>() {
        Err(ProtocolError::UnknownCommand(line)) => assert_eq!(line, "FADE IN 1 = 3"),
        other => panic!("expected unknown command, got {:?}", other),
    }
    assert!(matches!(
        "GET GAIN AUX 1".parse::<Command>(),
        Err(ProtocolError::UnknownChannelClass(_))
    ));
}

// ---------------------------------------------------------------------------
// 2. Reply lines from the console
// ---------------------------------------------------------------------------

#[test]
fn gain_reply_matches_the_query_keyword() {
    let query = Command::GetGain { class: ChannelClass::Input, channel: 1 };
    let reply = Response::parse("GAIN IN 1 = -7.5\r\n");

    assert!(matches!(&reply, Response::Line(l) if l.contains(query.reply_keyword())));
    assert_eq!(reply.value(), Some(-7.5));
}

#[test]
fn unparseable_replies_carry_no_value() {
    assert_eq!(Response::parse("GAIN IN 1 = loud").value(), None);
    assert_eq!(Response::parse("HELLO").value(), None);
    assert_eq!(numeric_suffix("GAIN IN 1 = inf"), None);
}

#[test]
fn error_reply_keeps_the_message() {
    let reply = Response::parse("ERR unknown command");
    assert!(reply.is_error());
    assert_eq!(reply, Response::Error("unknown command".to_string()));
}

#[test]
fn pushed_meter_line_becomes_a_reading() {
    let reading = TelemetryReading {
        class: ChannelClass::Output,
        channel: 3,
        level_db: -18.5,
        peak_db: -12.0,
    };
    let line = encode_meter(&reading);

    match Response::parse(&line) {
        Response::Meter(parsed) => assert_eq!(parsed, reading),
        other => panic!("expected meter, got {:?}", other),
    }
}

#[test]
fn meter_without_peak_uses_level_and_clamps() {
    match Response::parse("VU IN 7 = 6.0") {
        Response::Meter(reading) => {
            assert_eq!(reading.level_db, 0.0);
            assert_eq!(reading.peak_db, 0.0);
        }
        other => panic!("expected meter, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// 3. Level conversions
// ---------------------------------------------------------------------------

#[test]
fn fader_positions_map_to_decibels() {
    assert_eq!(level_to_db(0.0), -60.0);
    assert_eq!(level_to_db(1.0), 0.0);
    assert_eq!(db_to_level(-60.0), 0.0);
    assert_eq!(db_to_level(0.0), 1.0);

    for level in [0.01_f32, 0.1, 0.25, 0.5, 0.75, 0.9] {
        let back = db_to_level(level_to_db(level));
        assert!((back - level).abs() < 1e-4, "{} -> {}", level, back);
    }
}

#[test]
fn gain_clamp_handles_garbage() {
    assert_eq!(clamp_gain(f32::NAN), -60.0);
    assert_eq!(clamp_gain(f32::INFINITY), 10.0);
    assert_eq!(clamp_gain(-3.5), -3.5);
}

// ---------------------------------------------------------------------------
// 4. Status payloads
// ---------------------------------------------------------------------------

#[test]
fn connection_config_fills_defaults() {
    let config: ConnectionConfig = serde_json::from_str(r#"{"host":"10.1.1.20"}"#).unwrap();
    assert_eq!(config.host, "10.1.1.20");
    assert_eq!(config.port, DEFAULT_CONSOLE_PORT);
    assert_eq!(config.transport, Transport::Stream);
    assert!(!config.simulated);
    assert!(CANDIDATE_PORTS.contains(&config.port));
}

#[test]
fn watchdog_status_serializes_state_names() {
    let status = WatchdogStatus {
        state: WatchdogState::Connecting,
        attempts: 2,
        last_attempt_ms: Some(1_700_000_000_000),
        next_attempt_ms: None,
        last_error: Some("connection refused".to_string()),
        current_interval_ms: 60_000,
    };
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["state"], "connecting");
    assert_eq!(value["attempts"], 2);
    assert!(value["next_attempt_ms"].is_null());
}
