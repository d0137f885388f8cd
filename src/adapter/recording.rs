//! Test adapter that records every send

use super::BackendAdapter;
use crate::error::BackendError;
use crate::event::ParamValue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// One recorded send
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub parameter: String,
    pub value: ParamValue,
    pub at: Instant,
}

pub struct RecordingAdapter {
    id: String,
    sent: Mutex<Vec<Sent>>,
    fail_next: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    shut_down: AtomicBool,
}

impl RecordingAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sent: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            delay: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Fail the next `n` sends with `BackendError::Unreachable`
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make every send take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn values(&self) -> Vec<ParamValue> {
        self.sent.lock().iter().map(|s| s.value).collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for RecordingAdapter {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    async fn send(&self, parameter: &str, value: ParamValue) -> Result<(), BackendError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::Unreachable {
                backend: self.id.clone(),
                reason: "simulated failure".to_string(),
            });
        }

        self.sent.lock().push(Sent {
            parameter: parameter.to_string(),
            value,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
