//! Event source contract and producer tasks

use super::queue::{EventQueue, PushOutcome};
use super::telemetry::Telemetry;
use super::StatsCounters;
use crate::error::{EngineError, SourceError};
use crate::event::ControlEvent;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Producer of normalized control events
///
/// `poll_next` waits for the next event. It must be cancel safe: the engine
/// drops the pending future on shutdown.
#[async_trait]
pub trait EventSource: Send {
    fn source_id(&self) -> &str;

    /// Messages lost inside the transport since the last call
    fn take_dropped(&mut self) -> u64 {
        0
    }

    async fn poll_next(&mut self) -> Result<ControlEvent, SourceError>;
}

/// Queue one event and count it
pub(crate) async fn enqueue(
    queue: &EventQueue,
    stats: &StatsCounters,
    event: ControlEvent,
) -> Result<(), EngineError> {
    trace!("Queueing {} ({:?})", event.identity, event.value);
    stats.received.fetch_add(1, Ordering::Relaxed);
    if queue.push(event).await? == PushOutcome::DroppedOldest {
        stats.dropped.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

/// Spawn the producer task of one source
///
/// Malformed messages are reported and skipped. A disconnect is reported and
/// ends this task only; other sources keep running.
pub(crate) fn spawn_producer(
    mut source: Box<dyn EventSource>,
    queue: Arc<EventQueue>,
    telemetry: Telemetry,
    stats: Arc<StatsCounters>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let source_id = source.source_id().to_string();
        info!("Source '{}' started", source_id);

        loop {
            tokio::select! {
                biased;
                _ = super::wait_for_shutdown(&mut shutdown) => break,
                next = source.poll_next() => {
                    let lost = source.take_dropped();
                    if lost > 0 {
                        debug!("Source '{}' lost {} message(s) in transport", source_id, lost);
                        stats.dropped.fetch_add(lost, Ordering::Relaxed);
                    }
                    match next {
                        Ok(event) => {
                            if enqueue(&queue, &stats, event).await.is_err() {
                                break;
                            }
                        }
                        Err(SourceError::Malformed(e)) => {
                            stats.malformed.fetch_add(1, Ordering::Relaxed);
                            telemetry.malformed(&e);
                        }
                        Err(SourceError::Disconnected { source_id, reason }) => {
                            telemetry.disconnected(&source_id, &reason);
                            break;
                        }
                    }
                }
            }
        }

        debug!("Source '{}' stopped", source_id);
    })
}
