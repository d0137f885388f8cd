//! Gamepads (gilrs)
//!
//! gilrs is not `Send`, so it is polled on a dedicated thread that forwards
//! [`GamepadInput`] values to a [`ChannelSource`].

use super::channel::ChannelSource;
use crate::normalize::{GamepadAxis, GamepadButton, GamepadInput, GamepadNormalizer};
use gilrs::{Axis, Button, Event, EventType, Gilrs};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Inputs buffered between the polling thread and the producer task
const GAMEPAD_CHANNEL_CAPACITY: usize = 512;

/// Poll interval of the gilrs thread
const POLL_INTERVAL: Duration = Duration::from_millis(4);

pub fn map_axis(axis: Axis) -> Option<GamepadAxis> {
    match axis {
        Axis::LeftStickX => Some(GamepadAxis::LeftStickX),
        Axis::LeftStickY => Some(GamepadAxis::LeftStickY),
        Axis::RightStickX => Some(GamepadAxis::RightStickX),
        Axis::RightStickY => Some(GamepadAxis::RightStickY),
        Axis::LeftZ => Some(GamepadAxis::LeftTrigger),
        Axis::RightZ => Some(GamepadAxis::RightTrigger),
        _ => None,
    }
}

pub fn map_button(button: Button) -> Option<GamepadButton> {
    match button {
        Button::South => Some(GamepadButton::South),
        Button::East => Some(GamepadButton::East),
        Button::North => Some(GamepadButton::North),
        Button::West => Some(GamepadButton::West),
        Button::LeftTrigger => Some(GamepadButton::LeftShoulder),
        Button::RightTrigger => Some(GamepadButton::RightShoulder),
        Button::LeftTrigger2 => Some(GamepadButton::LeftTrigger),
        Button::RightTrigger2 => Some(GamepadButton::RightTrigger),
        Button::Select => Some(GamepadButton::Select),
        Button::Start => Some(GamepadButton::Start),
        Button::Mode => Some(GamepadButton::Mode),
        Button::LeftThumb => Some(GamepadButton::LeftThumb),
        Button::RightThumb => Some(GamepadButton::RightThumb),
        Button::DPadUp => Some(GamepadButton::DPadUp),
        Button::DPadDown => Some(GamepadButton::DPadDown),
        Button::DPadLeft => Some(GamepadButton::DPadLeft),
        Button::DPadRight => Some(GamepadButton::DPadRight),
        _ => None,
    }
}

/// Convert one gilrs event to a gamepad input
pub fn convert_event(pad: u8, event: EventType) -> Option<GamepadInput> {
    match event {
        EventType::ButtonPressed(button, _) | EventType::ButtonReleased(button, _) => {
            let pressed = matches!(event, EventType::ButtonPressed(_, _));
            map_button(button).map(|button| GamepadInput::Button { pad, button, pressed })
        }
        EventType::AxisChanged(axis, value, _) => {
            map_axis(axis).map(|axis| GamepadInput::Axis { pad, axis, value })
        }
        _ => None,
    }
}

/// Start polling gamepads as an event source
pub fn open(source_id: &str, deadzone: f32) -> ChannelSource<GamepadNormalizer> {
    let (tx, source) = ChannelSource::pair(
        GamepadNormalizer::new(source_id, deadzone),
        GAMEPAD_CHANNEL_CAPACITY,
    );

    let thread_name = format!("gamepad-{}", source_id);
    let spawned = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || poll_loop(tx));
    if let Err(e) = spawned {
        warn!("Failed to start gamepad thread: {}", e);
    }

    source
}

/// Blocking gilrs loop; ends when the source is dropped
fn poll_loop(tx: mpsc::Sender<GamepadInput>) {
    let mut gilrs = match Gilrs::new() {
        Ok(g) => {
            info!("GilRs initialized");
            g
        }
        Err(e) => {
            // Dropping tx reports the source as disconnected
            warn!("Failed to initialize GilRs: {:?}", e);
            return;
        }
    };

    for (id, gamepad) in gilrs.gamepads().filter(|(_, gp)| gp.is_connected()) {
        info!("Gamepad {}: \"{}\"", usize::from(id), gamepad.name());
    }

    while !tx.is_closed() {
        while let Some(Event { id, event, .. }) = gilrs.next_event() {
            let pad = usize::from(id).min(u8::MAX as usize) as u8;
            match event {
                EventType::Connected => info!("Gamepad {} connected", pad),
                EventType::Disconnected => info!("Gamepad {} disconnected", pad),
                _ => {}
            }

            let Some(input) = convert_event(pad, event) else {
                continue;
            };
            debug!("Gamepad input: {}", input);

            let delivered = match input {
                // Button edges must not be lost
                GamepadInput::Button { .. } => tx.blocking_send(input).is_ok(),
                GamepadInput::Axis { .. } => !matches!(
                    tx.try_send(input),
                    Err(mpsc::error::TrySendError::Closed(_))
                ),
            };
            if !delivered {
                debug!("Gamepad source dropped, stopping poll loop");
                return;
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}
