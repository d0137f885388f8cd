//! Concrete event sources (MIDI ports, OSC sockets, gamepads)

pub mod channel;
pub mod gamepad;
pub mod midi;
pub mod osc;

pub use channel::ChannelSource;
pub use osc::OscSource;
