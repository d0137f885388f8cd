//! Event normalizers
//!
//! Each transport gets a [`Normalizer`] that turns its raw message into a
//! canonical [`ControlEvent`]. Normalizers are pure: no I/O, no state beyond
//! configuration, so they can be exercised directly in tests.

pub mod gamepad;
pub mod midi;
pub mod osc;

use crate::error::MalformedMessage;
use crate::event::ControlEvent;
use tokio::time::Instant;

pub use gamepad::{GamepadAxis, GamepadButton, GamepadInput, GamepadNormalizer};
pub use midi::{MidiMessage, MidiNormalizer};
pub use osc::{OscArg, OscMessage, OscNormalizer};

/// Decoder from a transport-specific raw message to a [`ControlEvent`]
///
/// `Ok(None)` means the message is well formed but carries nothing the engine
/// consumes (MIDI clock, SysEx, OSC bundles). It is dropped without telemetry.
pub trait Normalizer: Send {
    /// Raw message type produced by the transport
    type Raw: Send;

    /// Source identifier stamped into every produced identity
    fn source_id(&self) -> &str;

    /// Decode one raw message captured at `at`
    fn decode(&self, raw: &Self::Raw, at: Instant) -> Result<Option<ControlEvent>, MalformedMessage>;
}
