//! Line protocol spoken with the control panel.
//!
//! Both directions carry one record per line.  The link layer owns the CRLF
//! terminator; everything here deals in bare payloads.  Inbound records are
//! colon-delimited numbers and are told apart by field count alone: two
//! fields are a dial reading, four are an alarm reading.

use thiserror::Error;

/// Pot readings this close to a rail snap to it; the panel's ADC jitters a
/// couple of counts at either end of travel.
const VOLUME_SNAP_LOW: u8 = 2;
const VOLUME_SNAP_HIGH: u8 = 98;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized panel record {line:?}")]
pub struct FrameError {
    pub line: String,
}

/// Alarm clock setting as the panel reports and displays it.
///
/// The enabled flag is a single `0`/`1` character on the wire and in the
/// state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlarmSetting {
    pub hours: u8,
    pub minutes: u8,
    pub enabled: bool,
}

impl AlarmSetting {
    pub fn flag(&self) -> u8 {
        u8::from(self.enabled)
    }
}

/// Commands the host sends to the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `TM:<HH:MM>` — wall clock for the panel's idle display.
    Time { hours: u8, minutes: u8 },
    /// `AL:<H>:<M>:<0|1>` — alarm setting, part of the handshake.
    Alarm(AlarmSetting),
    /// `D:<index>:<max>` — handshake done; current selection plus the
    /// highest index the encoder may report.
    HandshakeDone { index: usize, max_index: usize },
    /// `S<row>:<text>` — one display line.
    Display { row: u8, text: String },
    /// `E:<index>` — push a selection back to the panel.
    SelectionEcho { index: usize },
}

impl Frame {
    /// Render the bare line for this command, no terminator.
    pub fn encode(&self) -> String {
        match self {
            Frame::Time { hours, minutes } => format!("TM:{:02}:{:02}", hours, minutes),
            Frame::Alarm(alarm) => {
                format!("AL:{}:{}:{}", alarm.hours, alarm.minutes, alarm.flag())
            }
            Frame::HandshakeDone { index, max_index } => format!("D:{}:{}", index, max_index),
            Frame::Display { row, text } => format!("S{}:{}", row, text),
            Frame::SelectionEcho { index } => format!("E:{}", index),
        }
    }
}

/// Events the panel sends to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelEvent {
    /// `<index>:<volume>` — encoder position and volume pot reading.
    Dial { index: usize, volume: u8 },
    /// `<index>:<hours>:<minutes>:<0|1>` — encoder position and alarm wheels.
    Alarm {
        index: usize,
        hours: u8,
        minutes: u8,
        enabled: bool,
    },
}

impl PanelEvent {
    /// Parse one inbound record.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let err = || FrameError {
            line: line.to_string(),
        };
        let fields: Vec<&str> = line.split(':').collect();
        match fields.as_slice() {
            [index, volume] => Ok(PanelEvent::Dial {
                index: index.parse().map_err(|_| err())?,
                volume: volume.parse().map_err(|_| err())?,
            }),
            [index, hours, minutes, flag] => Ok(PanelEvent::Alarm {
                index: index.parse().map_err(|_| err())?,
                hours: hours.parse().map_err(|_| err())?,
                minutes: minutes.parse().map_err(|_| err())?,
                enabled: parse_flag(flag).ok_or_else(err)?,
            }),
            _ => Err(err()),
        }
    }
}

fn parse_flag(field: &str) -> Option<bool> {
    match field {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Snap pot jitter at the ends of travel: readings at or below 2 become 0,
/// at or above 98 become 100.
pub fn snap_volume(raw: u8) -> u8 {
    if raw <= VOLUME_SNAP_LOW {
        0
    } else if raw >= VOLUME_SNAP_HIGH {
        100
    } else {
        raw
    }
}

/// Last values reported by the panel.
///
/// This is the panel's view of the world, not the committed application
/// state; the control loop decides what to do with the difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelState {
    pub encoder_index: usize,
    pub volume: u8,
    pub alarm: AlarmSetting,
}

impl PanelState {
    pub fn new(encoder_index: usize, volume: u8, alarm: AlarmSetting) -> Self {
        Self {
            encoder_index,
            volume,
            alarm,
        }
    }

    /// Fold one event in.  Indexes past `max_index` clamp so downstream
    /// station lookups stay in bounds; the volume goes through the snap.
    pub fn apply(&mut self, event: PanelEvent, max_index: usize) {
        match event {
            PanelEvent::Dial { index, volume } => {
                self.encoder_index = index.min(max_index);
                self.volume = snap_volume(volume);
            }
            PanelEvent::Alarm {
                index,
                hours,
                minutes,
                enabled,
            } => {
                self.encoder_index = index.min(max_index);
                self.alarm = AlarmSetting {
                    hours,
                    minutes,
                    enabled,
                };
            }
        }
    }
}
