//! Console adapter - logs every parameter update
//!
//! Stands in for a real backend: lets a profile be exercised against a
//! controller without ElMo, PyMOL or Coot running.

use super::BackendAdapter;
use crate::error::BackendError;
use crate::event::ParamValue;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub struct ConsoleAdapter {
    id: String,
    initialized: AtomicBool,
    /// Number of updates applied since init
    send_count: AtomicU64,
}

impl ConsoleAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            initialized: AtomicBool::new(false),
            send_count: AtomicU64::new(0),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackendAdapter for ConsoleAdapter {
    fn adapter_id(&self) -> &str {
        &self.id
    }

    async fn init(&self) -> Result<(), BackendError> {
        self.initialized.store(true, Ordering::Release);
        self.send_count.store(0, Ordering::Relaxed);
        info!("ConsoleAdapter '{}' initialized", self.id);
        Ok(())
    }

    async fn send(&self, parameter: &str, value: ParamValue) -> Result<(), BackendError> {
        if !self.initialized.load(Ordering::Acquire) {
            warn!("ConsoleAdapter '{}' not initialized, rejecting '{}'", self.id, parameter);
            return Err(BackendError::Unreachable {
                backend: self.id.clone(),
                reason: "adapter not initialized".to_string(),
            });
        }

        let n = self.send_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "[{}] {}.{} = {} [#{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.id,
            parameter,
            value,
            n
        );
        debug!(backend = %self.id, parameter, value = %value, count = n, "ConsoleAdapter send");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        if self.initialized.swap(false, Ordering::AcqRel) {
            info!(
                "ConsoleAdapter '{}' shutting down ({} updates)",
                self.id,
                self.send_count()
            );
        }
        Ok(())
    }
}
