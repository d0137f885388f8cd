//! Error and telemetry channel
//!
//! Isolated failures are reported here for the hosting application to
//! display. Delivery never blocks the engine: when the channel is full the
//! event is counted and dropped (it is still logged through `tracing`).

use crate::error::{BackendError, MalformedMessage};
use crate::event::ControlIdentity;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    MalformedMessage,
    UnboundEvent,
    BackendError,
    SourceDisconnected,
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TelemetryKind::MalformedMessage => "malformed",
            TelemetryKind::UnboundEvent => "unbound",
            TelemetryKind::BackendError => "backend",
            TelemetryKind::SourceDisconnected => "disconnected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub kind: TelemetryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ControlIdentity>,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Sending side of the telemetry channel
#[derive(Debug, Clone)]
pub struct Telemetry {
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: Arc<AtomicU64>,
}

impl Telemetry {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn emit(&self, kind: TelemetryKind, identity: Option<ControlIdentity>, message: impl Into<String>) {
        let event = TelemetryEvent {
            kind,
            identity,
            message: message.into(),
            timestamp: Local::now(),
        };

        match kind {
            TelemetryKind::UnboundEvent => debug!(kind = %kind, "{}", event.message),
            _ => warn!(kind = %kind, "{}", event.message),
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn malformed(&self, error: &MalformedMessage) {
        self.emit(TelemetryKind::MalformedMessage, None, error.to_string());
    }

    pub fn unbound(&self, identity: &ControlIdentity) {
        self.emit(
            TelemetryKind::UnboundEvent,
            Some(identity.clone()),
            format!("no binding for {}", identity),
        );
    }

    pub fn backend_error(&self, identity: &ControlIdentity, error: &BackendError) {
        self.emit(TelemetryKind::BackendError, Some(identity.clone()), error.to_string());
    }

    pub fn disconnected(&self, source_id: &str, reason: &str) {
        self.emit(
            TelemetryKind::SourceDisconnected,
            None,
            format!("source '{}' disconnected: {}", source_id, reason),
        );
    }

    /// Events dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers_event() {
        let (telemetry, mut rx) = Telemetry::channel(4);
        let id = ControlIdentity::continuous("midi", 0, 3);
        telemetry.unbound(&id);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, TelemetryKind::UnboundEvent);
        assert_eq!(event.identity, Some(id));
        assert!(event.message.contains("no binding"));
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (telemetry, _rx) = Telemetry::channel(1);
        telemetry.disconnected("osc", "socket closed");
        telemetry.disconnected("osc", "socket closed");
        assert_eq!(telemetry.dropped(), 1);
    }

    #[test]
    fn test_serializes_as_json() {
        let (telemetry, mut rx) = Telemetry::channel(1);
        telemetry.malformed(&MalformedMessage::new("midi", "bad byte"));

        let event = rx.try_recv().unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "malformed_message");
        assert!(json.get("identity").is_none());
    }
}
