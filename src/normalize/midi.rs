//! MIDI normalization (CC, Note, Pitch Bend)
//!
//! Unlike a lenient sniffer parser, data bytes are checked rather than
//! masked: a data byte with the high bit set is a malformed message.

use super::Normalizer;
use crate::error::MalformedMessage;
use crate::event::{ControlEvent, ControlIdentity, ControlValue, PITCH_BEND_CONTROL};
use std::fmt;
use tokio::time::Instant;

/// Maximum 14-bit pitch bend value
const PITCH_BEND_MAX: f64 = 16383.0;

/// MIDI channel messages the engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    ///
    /// Returns `Ok(None)` for well-formed messages that are not consumed
    /// (program change, pressure, system messages).
    pub fn parse(data: &[u8]) -> Result<Option<Self>, String> {
        let Some(&status) = data.first() else {
            return Err("empty MIDI message".to_string());
        };

        // Running status would require per-port state
        if status < 0x80 {
            return Err(format!("missing status byte (0x{:02X})", status));
        }

        // System messages (0xF0-0xFF)
        if status >= 0xF0 {
            return Ok(None);
        }

        let message_type = status & 0xF0;
        let channel = status & 0x0F;

        let needed = match message_type {
            0xC0 | 0xD0 => 2,
            _ => 3,
        };
        if data.len() < needed {
            return Err(format!(
                "{} byte(s) for status 0x{:02X}, expected {}",
                data.len(),
                status,
                needed
            ));
        }
        if let Some(bad) = data[1..needed].iter().find(|b| **b > 0x7F) {
            return Err(format!("data byte 0x{:02X} out of range", bad));
        }

        let message = match message_type {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: data[1],
                velocity: data[2],
            }),
            0x90 => {
                // Note On with velocity 0 = Note Off
                if data[2] == 0 {
                    Some(MidiMessage::NoteOff {
                        channel,
                        note: data[1],
                        velocity: 0,
                    })
                } else {
                    Some(MidiMessage::NoteOn {
                        channel,
                        note: data[1],
                        velocity: data[2],
                    })
                }
            }
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                cc: data[1],
                value: data[2],
            }),
            0xE0 => {
                let lsb = data[1] as u16;
                let msb = data[2] as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            // Poly pressure, program change, channel pressure
            _ => None,
        };

        Ok(message)
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalizer for raw MIDI bytes from one input port
#[derive(Debug, Clone)]
pub struct MidiNormalizer {
    source_id: String,
}

impl MidiNormalizer {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
        }
    }

    /// Convert a parsed message into a control event
    pub fn to_event(&self, message: MidiMessage, at: Instant) -> ControlEvent {
        match message {
            MidiMessage::ControlChange { channel, cc, value } => {
                let identity = ControlIdentity::continuous(&self.source_id, channel, cc as u16);
                ControlEvent {
                    identity,
                    raw_value: value as f64,
                    value: ControlValue::Continuous(value as f64 / 127.0),
                    timestamp: at,
                }
            }
            MidiMessage::NoteOn { channel, note, velocity } => ControlEvent::discrete(
                ControlIdentity::discrete(&self.source_id, channel, note as u16),
                velocity as f64,
                true,
                at,
            ),
            MidiMessage::NoteOff { channel, note, velocity } => ControlEvent::discrete(
                ControlIdentity::discrete(&self.source_id, channel, note as u16),
                velocity as f64,
                false,
                at,
            ),
            MidiMessage::PitchBend { channel, value } => {
                let identity =
                    ControlIdentity::continuous(&self.source_id, channel, PITCH_BEND_CONTROL);
                ControlEvent {
                    identity,
                    raw_value: value as f64,
                    value: ControlValue::Continuous(value as f64 / PITCH_BEND_MAX),
                    timestamp: at,
                }
            }
        }
    }
}

impl Normalizer for MidiNormalizer {
    type Raw = Vec<u8>;

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn decode(&self, raw: &Vec<u8>, at: Instant) -> Result<Option<ControlEvent>, MalformedMessage> {
        let message = MidiMessage::parse(raw).map_err(|reason| {
            MalformedMessage::new(&self.source_id, format!("{} [{}]", reason, format_hex(raw)))
        })?;
        Ok(message.map(|m| self.to_event(m, at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ControlKind;

    fn decode(raw: &[u8]) -> Result<Option<ControlEvent>, MalformedMessage> {
        MidiNormalizer::new("midi").decode(&raw.to_vec(), Instant::now())
    }

    #[test]
    fn test_control_change() {
        let event = decode(&[0xB2, 7, 127]).unwrap().unwrap();

        assert_eq!(event.identity, ControlIdentity::continuous("midi", 2, 7));
        assert_eq!(event.raw_value, 127.0);
        assert_eq!(event.value, ControlValue::Continuous(1.0));

        let event = decode(&[0xB0, 1, 0]).unwrap().unwrap();
        assert_eq!(event.value, ControlValue::Continuous(0.0));
    }

    #[test]
    fn test_note_on_and_off() {
        let on = decode(&[0x90, 60, 100]).unwrap().unwrap();
        assert_eq!(on.identity.kind, ControlKind::Discrete);
        assert_eq!(on.identity.control_number, 60);
        assert_eq!(on.value, ControlValue::Discrete(true));

        let off = decode(&[0x80, 60, 64]).unwrap().unwrap();
        assert_eq!(off.identity, on.identity);
        assert_eq!(off.value, ControlValue::Discrete(false));
    }

    #[test]
    fn test_note_on_velocity_zero() {
        let event = decode(&[0x90, 60, 0]).unwrap().unwrap();
        assert_eq!(event.value, ControlValue::Discrete(false));
    }

    #[test]
    fn test_pitch_bend() {
        let event = decode(&[0xE0, 0x7F, 0x7F]).unwrap().unwrap();
        assert_eq!(event.identity.control_number, PITCH_BEND_CONTROL);
        assert_eq!(event.raw_value, 16383.0);
        assert_eq!(event.value, ControlValue::Continuous(1.0));

        // Center (8192)
        let event = decode(&[0xE0, 0x00, 0x40]).unwrap().unwrap();
        assert_eq!(event.raw_value, 8192.0);
    }

    #[test]
    fn test_malformed_messages() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0xB0, 7]).is_err());
        assert!(decode(&[0x07, 100]).is_err()); // running status
        let err = decode(&[0xB0, 7, 0x80]).unwrap_err();
        assert_eq!(err.source_id, "midi");
        assert!(err.reason.contains("out of range"));
    }

    #[test]
    fn test_unconsumed_messages_are_ignored() {
        assert_eq!(decode(&[0xF8]).unwrap(), None); // timing clock
        assert_eq!(decode(&[0xC0, 5]).unwrap(), None); // program change
        assert_eq!(decode(&[0xF0, 0x7E, 0xF7]).unwrap(), None); // sysex
    }
}
