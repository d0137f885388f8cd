//! Error taxonomy for the mapping and dispatch engine
//!
//! Failures are isolated to the smallest scope they affect: one message
//! ([`MalformedMessage`]), one binding ([`BackendError`]) or one source
//! ([`SourceError::Disconnected`]). None of them stop the event flow.

use crate::event::ControlIdentity;
use std::time::Duration;
use thiserror::Error;

/// Transport-level decode failure. Logged and dropped by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed message from '{source_id}': {reason}")]
pub struct MalformedMessage {
    pub source_id: String,
    pub reason: String,
}

impl MalformedMessage {
    pub fn new(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }
}

/// Adapter send failure. Reported per binding, never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend '{backend}' unreachable: {reason}")]
    Unreachable { backend: String, reason: String },

    #[error("backend '{backend}' rejected '{parameter}': {reason}")]
    Rejected {
        backend: String,
        parameter: String,
        reason: String,
    },

    #[error("backend '{backend}' did not answer within {timeout:?}")]
    Timeout { backend: String, timeout: Duration },

    #[error("no adapter registered for backend '{0}'")]
    UnknownAdapter(String),
}

/// Failure reported by an event source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error(transparent)]
    Malformed(#[from] MalformedMessage),

    #[error("source '{source_id}' disconnected: {reason}")]
    Disconnected { source_id: String, reason: String },
}

impl SourceError {
    pub fn disconnected(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        SourceError::Disconnected {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid mapping table or binding
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("duplicate binding for {0}")]
    DuplicateIdentity(ControlIdentity),

    #[error("invalid transform: {0}")]
    InvalidTransform(String),

    #[error("invalid throttle policy: {0}")]
    InvalidThrottle(String),
}

/// Engine lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine is stopped")]
    Stopped,

    #[error("event queue is closed")]
    QueueClosed,
}
