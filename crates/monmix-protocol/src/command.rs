/// Outbound console commands and their line encoding.
///
/// Every command is a single ASCII line terminated by CRLF, e.g.
/// `SET GAIN IN 3 = -12.0`. Numeric values are clamped before encoding so a
/// caller can never push the console outside its documented range.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::level::clamp_gain;
use crate::response::{numeric_suffix, ProtocolError, Response};
use crate::LINE_ENDING;

// -- Channel classes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelClass {
    #[serde(rename = "IN")]
    Input,
    #[serde(rename = "OUT")]
    Output,
    #[serde(rename = "STIN")]
    StereoInput,
}

impl ChannelClass {
    pub const ALL: [ChannelClass; 3] = [Self::Input, Self::Output, Self::StereoInput];

    /// Wire token for this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "IN",
            Self::Output => "OUT",
            Self::StereoInput => "STIN",
        }
    }

    /// Only input-type channels can feed a bus.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Input | Self::StereoInput)
    }
}

impl fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelClass {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" | "INPUT" => Ok(Self::Input),
            "OUT" | "OUTPUT" | "BUS" => Ok(Self::Output),
            "STIN" | "STEREO" | "STEREO_INPUT" => Ok(Self::StereoInput),
            other => Err(ProtocolError::UnknownChannelClass(other.to_string())),
        }
    }
}

// -- Commands --

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetGain { class: ChannelClass, channel: u16, db: f32 },
    GetGain { class: ChannelClass, channel: u16 },
    SetMute { class: ChannelClass, channel: u16, muted: bool },
    GetVu { class: ChannelClass, channel: u16 },
    SetPreset { preset: u16 },
    GetPreset,
    /// Undocumented on real hardware; may be answered with an error or not at all.
    SetSend { class: ChannelClass, channel: u16, bus: u16, db: f32 },
    GetSend { class: ChannelClass, channel: u16, bus: u16 },
}

impl Command {
    /// Encode as a wire line including the trailing CRLF.
    pub fn encode(&self) -> String {
        let mut line = self.to_string();
        line.push_str(LINE_ENDING);
        line
    }

    /// Keyword the matching reply is expected to carry. Used only to flag
    /// replies that look like they belong to a different command.
    pub fn reply_keyword(&self) -> &'static str {
        match self {
            Self::SetGain { .. } | Self::GetGain { .. } => "GAIN",
            Self::SetMute { .. } => "MUTE",
            Self::GetVu { .. } => "VU",
            Self::SetPreset { .. } | Self::GetPreset => "PRESET",
            Self::SetSend { .. } | Self::GetSend { .. } => "SEND",
        }
    }

    fn is_set(&self) -> bool {
        matches!(
            self,
            Self::SetGain { .. } | Self::SetMute { .. } | Self::SetPreset { .. } | Self::SetSend { .. }
        )
    }

    /// Whether `response` can be the answer to this command. Sets expect an
    /// acknowledgement, queries a value of their own kind; an error fits
    /// either. A reply that does not fit most likely belongs to another
    /// command that timed out earlier.
    pub fn accepts(&self, response: &Response) -> bool {
        match response {
            Response::Error(_) => true,
            Response::Ack => self.is_set(),
            Response::Preset(_) => matches!(self, Self::GetPreset),
            Response::Meter(reading) => matches!(
                *self,
                Self::GetVu { class, channel } if class == reading.class && channel == reading.channel
            ),
            Response::Line(text) => {
                text.to_ascii_uppercase().contains(self.reply_keyword())
                    && !(self.is_set() && numeric_suffix(text).is_some())
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SetGain { class, channel, db } => {
                write!(f, "SET GAIN {} {} = {:.1}", class, channel, clamp_gain(db))
            }
            Self::GetGain { class, channel } => write!(f, "GET GAIN {} {}", class, channel),
            Self::SetMute { class, channel, muted } => write!(
                f,
                "SET MUTE {} {} {}",
                class,
                channel,
                if muted { "ON" } else { "OFF" }
            ),
            Self::GetVu { class, channel } => write!(f, "GET VU {} {}", class, channel),
            Self::SetPreset { preset } => write!(f, "SET PRESET {}", preset),
            Self::GetPreset => f.write_str("GET PRESET"),
            Self::SetSend { class, channel, bus, db } => write!(
                f,
                "SET SEND {} {} OUT {} = {:.1}",
                class,
                channel,
                bus,
                clamp_gain(db)
            ),
            Self::GetSend { class, channel, bus } => {
                write!(f, "GET SEND {} {} OUT {}", class, channel, bus)
            }
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    /// Parse a command line as the console would. Used by the simulator.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (head, value) = match line.split_once('=') {
            Some((h, v)) => (h.trim(), Some(v.trim())),
            None => (line, None),
        };
        let tokens: Vec<&str> = head.split_whitespace().collect();
        let upper: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();
        let words: Vec<&str> = upper.iter().map(String::as_str).collect();

        let number = |s: &str| -> Result<u16, ProtocolError> {
            s.parse::<u16>()
                .map_err(|_| ProtocolError::Malformed(line.to_string()))
        };
        let db = || -> Result<f32, ProtocolError> {
            value
                .and_then(|v| v.parse::<f32>().ok())
                .ok_or_else(|| ProtocolError::Malformed(line.to_string()))
        };

        match words.as_slice() {
            ["SET", "GAIN", class, ch] => Ok(Self::SetGain {
                class: class.parse()?,
                channel: number(ch)?,
                db: db()?,
            }),
            ["GET", "GAIN", class, ch] => Ok(Self::GetGain {
                class: class.parse()?,
                channel: number(ch)?,
            }),
            ["SET", "MUTE", class, ch, state] => Ok(Self::SetMute {
                class: class.parse()?,
                channel: number(ch)?,
                muted: match *state {
                    "ON" => true,
                    "OFF" => false,
                    _ => return Err(ProtocolError::Malformed(line.to_string())),
                },
            }),
            ["GET", "VU", class, ch] => Ok(Self::GetVu {
                class: class.parse()?,
                channel: number(ch)?,
            }),
            ["SET", "PRESET", n] => Ok(Self::SetPreset { preset: number(n)? }),
            ["GET", "PRESET"] => Ok(Self::GetPreset),
            ["SET", "SEND", class, ch, "OUT", bus] => Ok(Self::SetSend {
                class: class.parse()?,
                channel: number(ch)?,
                bus: number(bus)?,
                db: db()?,
            }),
            ["GET", "SEND", class, ch, "OUT", bus] => Ok(Self::GetSend {
                class: class.parse()?,
                channel: number(ch)?,
                bus: number(bus)?,
            }),
            _ => Err(ProtocolError::UnknownCommand(line.to_string())),
        }
    }
}
