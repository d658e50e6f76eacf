/// In-process stand-in for the console.
///
/// Answers commands from one owned state structure and runs a meter task
/// that random-walks every channel's level, publishing the readings as
/// telemetry. Never opens a socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use monmix_protocol::response::encode_meter;
use monmix_protocol::{
    clamp_gain, clamp_vu, ChannelClass, Command, TelemetryReading, GAIN_MIN_DB, VU_MIN_DB,
};

use super::ClientEvent;

pub const SIM_INPUTS: u16 = 16;
pub const SIM_OUTPUTS: u16 = 8;
pub const SIM_STEREO_INPUTS: u16 = 4;
pub const SIM_PRESETS: u16 = 99;

const METER_TICK: Duration = Duration::from_millis(100);
/// Largest per-tick level change (dB)
const METER_STEP_DB: f32 = 3.0;
/// Peak-hold fall-off per tick (dB)
const PEAK_DECAY_DB: f32 = 1.5;

#[derive(Debug, Clone, Copy)]
struct Meter {
    level: f32,
    peak: f32,
}

struct ConsoleState {
    gains: HashMap<(ChannelClass, u16), f32>,
    mutes: HashMap<(ChannelClass, u16), bool>,
    sends: HashMap<(ChannelClass, u16, u16), f32>,
    meters: HashMap<(ChannelClass, u16), Meter>,
    preset: u16,
    rng: StdRng,
}

fn channel_count(class: ChannelClass) -> u16 {
    match class {
        ChannelClass::Input => SIM_INPUTS,
        ChannelClass::Output => SIM_OUTPUTS,
        ChannelClass::StereoInput => SIM_STEREO_INPUTS,
    }
}

fn in_range(class: ChannelClass, channel: u16) -> bool {
    (1..=channel_count(class)).contains(&channel)
}

impl ConsoleState {
    fn seeded(mut rng: StdRng) -> Self {
        let mut gains = HashMap::new();
        let mut mutes = HashMap::new();
        let mut meters = HashMap::new();

        for class in ChannelClass::ALL {
            for ch in 1..=channel_count(class) {
                gains.insert((class, ch), rng.random_range(-30.0f32..0.0).round());
                mutes.insert((class, ch), false);
                let level = rng.random_range(-50.0f32..-20.0);
                meters.insert((class, ch), Meter { level, peak: level });
            }
        }

        Self {
            gains,
            mutes,
            sends: HashMap::new(),
            meters,
            preset: 1,
            rng,
        }
    }

    fn reading(&self, class: ChannelClass, channel: u16) -> TelemetryReading {
        let muted = self.mutes.get(&(class, channel)).copied().unwrap_or(false);
        let meter = self
            .meters
            .get(&(class, channel))
            .copied()
            .unwrap_or(Meter { level: VU_MIN_DB, peak: VU_MIN_DB });
        let (level_db, peak_db) = if muted {
            (VU_MIN_DB, VU_MIN_DB)
        } else {
            (meter.level, meter.peak)
        };
        TelemetryReading {
            class,
            channel,
            level_db,
            peak_db,
        }
    }

    fn respond(&mut self, command: &Command) -> String {
        match *command {
            Command::SetGain { class, channel, db } if in_range(class, channel) => {
                self.gains.insert((class, channel), clamp_gain(db));
                "OK".to_string()
            }
            Command::GetGain { class, channel } if in_range(class, channel) => {
                let db = self.gains.get(&(class, channel)).copied().unwrap_or(GAIN_MIN_DB);
                format!("GAIN {} {} = {:.1}", class, channel, db)
            }
            Command::SetMute { class, channel, muted } if in_range(class, channel) => {
                self.mutes.insert((class, channel), muted);
                "OK".to_string()
            }
            Command::GetVu { class, channel } if in_range(class, channel) => {
                encode_meter(&self.reading(class, channel))
            }
            Command::SetPreset { preset } if (1..=SIM_PRESETS).contains(&preset) => {
                self.preset = preset;
                "OK".to_string()
            }
            Command::GetPreset => format!("PRESET = {}", self.preset),
            Command::SetSend { class, channel, bus, db }
                if class.can_send() && in_range(class, channel) && in_range(ChannelClass::Output, bus) =>
            {
                self.sends.insert((class, channel, bus), clamp_gain(db));
                "OK".to_string()
            }
            Command::GetSend { class, channel, bus }
                if class.can_send() && in_range(class, channel) && in_range(ChannelClass::Output, bus) =>
            {
                let db = self.sends.get(&(class, channel, bus)).copied().unwrap_or(GAIN_MIN_DB);
                format!("SEND {} {} OUT {} = {:.1}", class, channel, bus, db)
            }
            _ => "ERR out of range".to_string(),
        }
    }

    /// Advance every meter one random-walk step and return the new readings.
    fn step(&mut self) -> Vec<TelemetryReading> {
        let keys: Vec<(ChannelClass, u16)> = self.meters.keys().copied().collect();
        let mut readings = Vec::with_capacity(keys.len());
        for key in keys {
            let delta = self.rng.random_range(-METER_STEP_DB..METER_STEP_DB);
            if let Some(meter) = self.meters.get_mut(&key) {
                meter.level = clamp_vu(meter.level + delta);
                meter.peak = clamp_vu((meter.peak - PEAK_DECAY_DB).max(meter.level));
            }
            readings.push(self.reading(key.0, key.1));
        }
        readings.sort_by_key(|r| (r.class, r.channel));
        readings
    }
}

/// A running simulated console. Dropping it does not stop the meter task;
/// call [`SimulatedConsole::shutdown`].
pub struct SimulatedConsole {
    state: Arc<Mutex<ConsoleState>>,
    shutdown: CancellationToken,
}

impl SimulatedConsole {
    /// Seed pseudo-random starting values and start the meter task.
    pub(crate) fn start(events: broadcast::Sender<ClientEvent>) -> Self {
        let state = Arc::new(Mutex::new(ConsoleState::seeded(StdRng::from_os_rng())));
        let shutdown = CancellationToken::new();

        tokio::spawn(run_meters(state.clone(), events, shutdown.clone()));

        Self { state, shutdown }
    }

    /// Answer one command line the way the console would.
    pub fn respond(&self, line: &str) -> String {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => return format!("ERR {}", e),
        };
        match self.state.lock() {
            Ok(mut state) => state.respond(&command),
            Err(_) => "ERR simulator unavailable".to_string(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn run_meters(
    state: Arc<Mutex<ConsoleState>>,
    events: broadcast::Sender<ClientEvent>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(METER_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let readings = match state.lock() {
                    Ok(mut state) => state.step(),
                    Err(_) => break,
                };
                // No receivers is fine; nobody is listening yet.
                let _ = events.send(ClientEvent::Telemetry(readings));
            }
        }
    }

    debug!("Simulator meter task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConsoleState {
        ConsoleState::seeded(StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_seeded_gains_are_in_range() {
        let state = state();
        assert_eq!(
            state.gains.len(),
            (SIM_INPUTS + SIM_OUTPUTS + SIM_STEREO_INPUTS) as usize
        );
        assert!(state.gains.values().all(|g| (-60.0..=10.0).contains(g)));
    }

    #[test]
    fn test_gain_roundtrip_is_clamped() {
        let mut state = state();
        let set = Command::SetGain {
            class: ChannelClass::Input,
            channel: 1,
            db: 100.0,
        };
        assert_eq!(state.respond(&set), "OK");
        let get = Command::GetGain {
            class: ChannelClass::Input,
            channel: 1,
        };
        assert_eq!(state.respond(&get), "GAIN IN 1 = 10.0");
    }

    #[test]
    fn test_out_of_range_channel_is_rejected() {
        let mut state = state();
        let get = Command::GetGain {
            class: ChannelClass::Output,
            channel: SIM_OUTPUTS + 1,
        };
        assert!(state.respond(&get).starts_with("ERR"));
        let send = Command::SetSend {
            class: ChannelClass::Output,
            channel: 1,
            bus: 2,
            db: 0.0,
        };
        assert!(state.respond(&send).starts_with("ERR"));
    }

    #[test]
    fn test_muted_channel_meters_at_floor() {
        let mut state = state();
        state.respond(&Command::SetMute {
            class: ChannelClass::StereoInput,
            channel: 2,
            muted: true,
        });
        let reading = state.reading(ChannelClass::StereoInput, 2);
        assert_eq!(reading.level_db, VU_MIN_DB);
    }

    #[test]
    fn test_random_walk_stays_bounded() {
        let mut state = state();
        for _ in 0..500 {
            for r in state.step() {
                assert!((-60.0..=0.0).contains(&r.level_db));
                assert!(r.peak_db >= r.level_db);
            }
        }
    }
}
