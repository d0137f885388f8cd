//! Canonical control event types
//!
//! Every transport (MIDI, OSC, gamepad) is normalized into a [`ControlEvent`]
//! before it reaches the mapping table. Values live in a fixed canonical space:
//! `[0.0, 1.0]` for continuous controls, `bool` for discrete ones.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Control number reserved for MIDI pitch bend (one past the CC range)
pub const PITCH_BEND_CONTROL: u16 = 128;

/// Kind of physical control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Knobs, faders, sticks, pitch wheels
    Continuous,
    /// Buttons, pads, triggers
    Discrete,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::Continuous => write!(f, "continuous"),
            ControlKind::Discrete => write!(f, "discrete"),
        }
    }
}

/// Stable identity of one physical or virtual control
///
/// Stable for the lifetime of the process for a given device + port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlIdentity {
    /// Source the control belongs to (e.g. "midi", "osc/1/fader1", "gamepad")
    pub source_id: String,
    /// Channel (MIDI channel 0-15, gamepad index, 0 for OSC)
    pub channel: u8,
    /// Controller number (CC number, note number, axis code)
    pub control_number: u16,
    pub kind: ControlKind,
}

impl ControlIdentity {
    pub fn new(
        source_id: impl Into<String>,
        channel: u8,
        control_number: u16,
        kind: ControlKind,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            channel,
            control_number,
            kind,
        }
    }

    pub fn continuous(source_id: impl Into<String>, channel: u8, control_number: u16) -> Self {
        Self::new(source_id, channel, control_number, ControlKind::Continuous)
    }

    pub fn discrete(source_id: impl Into<String>, channel: u8, control_number: u16) -> Self {
        Self::new(source_id, channel, control_number, ControlKind::Discrete)
    }
}

impl fmt::Display for ControlIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/ch{}/{}:{}",
            self.source_id, self.channel, self.control_number, self.kind
        )
    }
}

/// Normalized control value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlValue {
    /// Continuous value in `[0.0, 1.0]`
    Continuous(f64),
    /// Discrete on/off state
    Discrete(bool),
}

impl ControlValue {
    /// Value as a float in `[0.0, 1.0]` (discrete maps to 0.0 / 1.0)
    pub fn as_unit(&self) -> f64 {
        match *self {
            ControlValue::Continuous(v) => v,
            ControlValue::Discrete(true) => 1.0,
            ControlValue::Discrete(false) => 0.0,
        }
    }
}

/// Immutable, normalized representation of one input change
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEvent {
    pub identity: ControlIdentity,
    /// Value as reported by the transport (CC value, 14-bit bend, raw axis)
    pub raw_value: f64,
    pub value: ControlValue,
    /// Monotonic capture time
    pub timestamp: Instant,
}

impl ControlEvent {
    /// Build a continuous event. Returns `None` if `normalized` is outside `[0, 1]`
    /// or either value is not finite.
    pub fn continuous(
        identity: ControlIdentity,
        raw_value: f64,
        normalized: f64,
        timestamp: Instant,
    ) -> Option<Self> {
        if !raw_value.is_finite() || !normalized.is_finite() || !(0.0..=1.0).contains(&normalized) {
            return None;
        }
        debug_assert_eq!(identity.kind, ControlKind::Continuous);
        Some(Self {
            identity,
            raw_value,
            value: ControlValue::Continuous(normalized),
            timestamp,
        })
    }

    /// Build a discrete (on/off) event
    pub fn discrete(identity: ControlIdentity, raw_value: f64, on: bool, timestamp: Instant) -> Self {
        debug_assert_eq!(identity.kind, ControlKind::Discrete);
        Self {
            identity,
            raw_value,
            value: ControlValue::Discrete(on),
            timestamp,
        }
    }

    pub fn kind(&self) -> ControlKind {
        self.identity.kind
    }
}

/// Value delivered to a backend adapter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ParamValue::Float(v) => Some(v),
            ParamValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ParamValue::Bool(b) => Some(b),
            ParamValue::Float(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{:.6}", v),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuous_rejects_out_of_range() {
        let id = ControlIdentity::continuous("midi", 0, 1);
        let now = Instant::now();

        assert!(ControlEvent::continuous(id.clone(), 64.0, 0.5, now).is_some());
        assert!(ControlEvent::continuous(id.clone(), 0.0, -0.01, now).is_none());
        assert!(ControlEvent::continuous(id.clone(), 0.0, 1.01, now).is_none());
        assert!(ControlEvent::continuous(id, f64::NAN, 0.5, now).is_none());
    }

    #[test]
    fn test_identity_distinguishes_kind() {
        let cc = ControlIdentity::continuous("midi", 0, 10);
        let note = ControlIdentity::discrete("midi", 0, 10);
        assert_ne!(cc, note);
        assert_eq!(cc.to_string(), "midi/ch0/10:continuous");
    }

    #[test]
    fn test_discrete_as_unit() {
        assert_eq!(ControlValue::Discrete(true).as_unit(), 1.0);
        assert_eq!(ControlValue::Discrete(false).as_unit(), 0.0);
        assert_eq!(ControlValue::Continuous(0.25).as_unit(), 0.25);
    }
}
