//! Channel-fed event source
//!
//! Transports that deliver raw messages from a callback or a thread (midir,
//! gilrs) push them into an mpsc channel; this source normalizes them on the
//! producer side.

use crate::engine::EventSource;
use crate::error::SourceError;
use crate::event::ControlEvent;
use crate::normalize::Normalizer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

/// Event source reading raw messages from a channel
pub struct ChannelSource<N: Normalizer> {
    normalizer: N,
    rx: mpsc::Receiver<N::Raw>,
    /// Raw messages the transport could not queue
    dropped: Arc<AtomicU64>,
    /// Keeps the underlying transport (e.g. a MIDI connection) open.
    /// Declared after `rx` so a callback blocked on a full channel is released
    /// before the transport is closed.
    _guard: Option<Box<dyn Send>>,
}

impl<N: Normalizer> ChannelSource<N> {
    pub fn new(normalizer: N, rx: mpsc::Receiver<N::Raw>) -> Self {
        Self {
            normalizer,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
            _guard: None,
        }
    }

    /// Create a source together with the sender feeding it
    pub fn pair(normalizer: N, capacity: usize) -> (mpsc::Sender<N::Raw>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(normalizer, rx))
    }

    /// Counter for the transport side to bump when its channel is full
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    /// Tie the lifetime of `guard` to this source
    pub fn with_guard(mut self, guard: impl Send + 'static) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }
}

#[async_trait]
impl<N> EventSource for ChannelSource<N>
where
    N: Normalizer + 'static,
    N::Raw: 'static,
{
    fn source_id(&self) -> &str {
        self.normalizer.source_id()
    }

    fn take_dropped(&mut self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    async fn poll_next(&mut self) -> Result<ControlEvent, SourceError> {
        loop {
            let Some(raw) = self.rx.recv().await else {
                return Err(SourceError::disconnected(
                    self.normalizer.source_id(),
                    "transport closed",
                ));
            };
            match self.normalizer.decode(&raw, Instant::now())? {
                Some(event) => return Ok(event),
                None => trace!("Ignoring message on '{}'", self.normalizer.source_id()),
            }
        }
    }
}
