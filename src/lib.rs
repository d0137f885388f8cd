//! dialbridge - control surface to visualization parameter bridge
//!
//! MIDI, OSC and gamepad input is normalized into [`event::ControlEvent`]s,
//! resolved against a hot-swappable mapping table, rate limited per binding
//! and dispatched to backend adapters.

pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod mapping;
pub mod normalize;
pub mod sources;

pub use engine::{Engine, EngineHandle, EngineSettings};
pub use error::{BackendError, EngineError, MalformedMessage, MappingError, SourceError};
pub use event::{ControlEvent, ControlIdentity, ControlKind, ControlValue, ParamValue};
