//! Gamepad normalization (sticks, triggers, buttons)
//!
//! Axis values arrive in `[-1.0, 1.0]`. Sticks are mapped to `[0.0, 1.0]` with
//! the centre at 0.5; a centre deadzone snaps small movements to exactly 0.5
//! and rescales the remaining travel so there is no jump at its edge.
//! Triggers are unipolar: rest is 0.0, negative readings count as rest, and
//! the deadzone sits at the low end.

use super::Normalizer;
use crate::error::MalformedMessage;
use crate::event::{ControlEvent, ControlIdentity};
use std::fmt;
use tokio::time::Instant;

/// Analog axes, numbered for use as control numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamepadAxis {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftTrigger,
    RightTrigger,
}

impl GamepadAxis {
    pub fn code(self) -> u16 {
        match self {
            GamepadAxis::LeftStickX => 0,
            GamepadAxis::LeftStickY => 1,
            GamepadAxis::RightStickX => 2,
            GamepadAxis::RightStickY => 3,
            GamepadAxis::LeftTrigger => 4,
            GamepadAxis::RightTrigger => 5,
        }
    }

    /// Analog triggers rest at one end of their travel, not in the middle
    pub fn is_trigger(self) -> bool {
        matches!(self, GamepadAxis::LeftTrigger | GamepadAxis::RightTrigger)
    }

    /// Short name used in logs and the monitor output
    pub fn name(self) -> &'static str {
        match self {
            GamepadAxis::LeftStickX => "lx",
            GamepadAxis::LeftStickY => "ly",
            GamepadAxis::RightStickX => "rx",
            GamepadAxis::RightStickY => "ry",
            GamepadAxis::LeftTrigger => "zl",
            GamepadAxis::RightTrigger => "zr",
        }
    }
}

/// Buttons, numbered for use as control numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamepadButton {
    South,
    East,
    North,
    West,
    LeftShoulder,
    RightShoulder,
    LeftTrigger,
    RightTrigger,
    Select,
    Start,
    Mode,
    LeftThumb,
    RightThumb,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
}

impl GamepadButton {
    pub fn code(self) -> u16 {
        match self {
            GamepadButton::South => 0,
            GamepadButton::East => 1,
            GamepadButton::North => 2,
            GamepadButton::West => 3,
            GamepadButton::LeftShoulder => 4,
            GamepadButton::RightShoulder => 5,
            GamepadButton::LeftTrigger => 6,
            GamepadButton::RightTrigger => 7,
            GamepadButton::Select => 8,
            GamepadButton::Start => 9,
            GamepadButton::Mode => 10,
            GamepadButton::LeftThumb => 11,
            GamepadButton::RightThumb => 12,
            GamepadButton::DPadUp => 13,
            GamepadButton::DPadDown => 14,
            GamepadButton::DPadLeft => 15,
            GamepadButton::DPadRight => 16,
        }
    }
}

/// Raw gamepad input as produced by the polling thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GamepadInput {
    Axis {
        pad: u8,
        axis: GamepadAxis,
        value: f32,
    },
    Button {
        pad: u8,
        button: GamepadButton,
        pressed: bool,
    },
}

impl fmt::Display for GamepadInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GamepadInput::Axis { pad, axis, value } => {
                write!(f, "pad{} axis.{} {:+.3}", pad, axis.name(), value)
            }
            GamepadInput::Button { pad, button, pressed } => {
                write!(f, "pad{} btn.{:?} {}", pad, button, if *pressed { "down" } else { "up" })
            }
        }
    }
}

/// Apply the centre deadzone to a raw axis value in `[-1, 1]`
///
/// Values inside the deadzone become 0.0; the remaining range
/// `[deadzone, 1]` is rescaled to `[0, 1]` keeping the sign.
pub fn apply_deadzone(raw_value: f32, deadzone: f32) -> f32 {
    if raw_value.abs() < deadzone {
        return 0.0;
    }
    if deadzone <= 0.0 {
        return raw_value;
    }
    let magnitude = (raw_value.abs() - deadzone) / (1.0 - deadzone);
    raw_value.signum() * magnitude.min(1.0)
}

/// Normalizer for gamepad inputs
#[derive(Debug, Clone)]
pub struct GamepadNormalizer {
    source_id: String,
    deadzone: f32,
}

impl GamepadNormalizer {
    pub fn new(source_id: impl Into<String>, deadzone: f32) -> Self {
        Self {
            source_id: source_id.into(),
            deadzone: deadzone.clamp(0.0, 0.99),
        }
    }
}

impl Normalizer for GamepadNormalizer {
    type Raw = GamepadInput;

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn decode(&self, raw: &GamepadInput, at: Instant) -> Result<Option<ControlEvent>, MalformedMessage> {
        match *raw {
            GamepadInput::Axis { pad, axis, value } => {
                if !value.is_finite() || value.abs() > 1.0 {
                    return Err(MalformedMessage::new(
                        &self.source_id,
                        format!("axis {} value {} outside [-1, 1]", axis.name(), value),
                    ));
                }
                let shaped = apply_deadzone(value, self.deadzone) as f64;
                let normalized = if axis.is_trigger() {
                    shaped.clamp(0.0, 1.0)
                } else {
                    ((shaped + 1.0) / 2.0).clamp(0.0, 1.0)
                };
                let identity = ControlIdentity::continuous(&self.source_id, pad, axis.code());
                ControlEvent::continuous(identity, value as f64, normalized, at)
                    .map(Some)
                    .ok_or_else(|| {
                        MalformedMessage::new(&self.source_id, format!("axis {} not normalizable", axis.name()))
                    })
            }
            GamepadInput::Button { pad, button, pressed } => Ok(Some(ControlEvent::discrete(
                ControlIdentity::discrete(&self.source_id, pad, button.code()),
                if pressed { 1.0 } else { 0.0 },
                pressed,
                at,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ControlValue;

    fn axis(value: f32) -> GamepadInput {
        GamepadInput::Axis {
            pad: 1,
            axis: GamepadAxis::LeftStickX,
            value,
        }
    }

    fn unit(event: ControlEvent) -> f64 {
        match event.value {
            ControlValue::Continuous(v) => v,
            other => panic!("expected continuous value, got {:?}", other),
        }
    }

    #[test]
    fn test_deadzone_snaps_to_center() {
        let normalizer = GamepadNormalizer::new("pad", 0.1);
        let event = normalizer.decode(&axis(0.05), Instant::now()).unwrap().unwrap();
        assert_eq!(unit(event), 0.5);

        let event = normalizer.decode(&axis(-0.09), Instant::now()).unwrap().unwrap();
        assert_eq!(unit(event), 0.5);
    }

    #[test]
    fn test_axis_extremes() {
        let normalizer = GamepadNormalizer::new("pad", 0.1);
        let now = Instant::now();

        assert_eq!(unit(normalizer.decode(&axis(1.0), now).unwrap().unwrap()), 1.0);
        assert_eq!(unit(normalizer.decode(&axis(-1.0), now).unwrap().unwrap()), 0.0);

        let event = normalizer.decode(&axis(1.0), now).unwrap().unwrap();
        assert_eq!(event.identity, ControlIdentity::continuous("pad", 1, 0));
    }

    #[test]
    fn test_deadzone_edge_is_continuous() {
        assert_eq!(apply_deadzone(0.1, 0.1), 0.0);
        assert!(apply_deadzone(0.11, 0.1) < 0.02);
        assert_eq!(apply_deadzone(-1.0, 0.1), -1.0);
    }

    #[test]
    fn test_trigger_is_unipolar() {
        let normalizer = GamepadNormalizer::new("pad", 0.1);
        let now = Instant::now();
        let trigger = |value| GamepadInput::Axis {
            pad: 0,
            axis: GamepadAxis::RightTrigger,
            value,
        };

        let value = |input| normalizer.decode(&input, now).unwrap().unwrap().value;
        assert_eq!(value(trigger(0.0)), ControlValue::Continuous(0.0));
        assert_eq!(value(trigger(0.05)), ControlValue::Continuous(0.0));
        assert_eq!(value(trigger(-0.5)), ControlValue::Continuous(0.0));
        assert_eq!(value(trigger(1.0)), ControlValue::Continuous(1.0));
        match value(trigger(0.55)) {
            ControlValue::Continuous(v) => assert!((v - 0.5).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_axis_is_malformed() {
        let normalizer = GamepadNormalizer::new("pad", 0.1);
        assert!(normalizer.decode(&axis(1.5), Instant::now()).is_err());
        assert!(normalizer.decode(&axis(f32::NAN), Instant::now()).is_err());
    }

    #[test]
    fn test_button_is_discrete() {
        let normalizer = GamepadNormalizer::new("pad", 0.1);
        let input = GamepadInput::Button {
            pad: 0,
            button: GamepadButton::South,
            pressed: true,
        };
        let event = normalizer.decode(&input, Instant::now()).unwrap().unwrap();
        assert_eq!(event.identity, ControlIdentity::discrete("pad", 0, 0));
        assert_eq!(event.value, ControlValue::Discrete(true));
    }
}
