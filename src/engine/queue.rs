//! Bounded event queue between producers and the dispatcher loop
//!
//! Two lanes share one arrival order:
//! - continuous events: bounded, the oldest queued event is dropped when full
//! - discrete events: a small reserve, producers wait for room instead of
//!   dropping (button presses are one-shot actions)

use crate::error::EngineError;
use crate::event::{ControlEvent, ControlKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after dropping the oldest continuous event
    DroppedOldest,
}

#[derive(Debug, Default)]
struct Lanes {
    continuous: VecDeque<(u64, ControlEvent)>,
    discrete: VecDeque<(u64, ControlEvent)>,
    next_seq: u64,
    closed: bool,
}

impl Lanes {
    fn pop_oldest(&mut self) -> Option<(ControlEvent, ControlKind)> {
        let take_discrete = match (self.continuous.front(), self.discrete.front()) {
            (Some((c, _)), Some((d, _))) => d < c,
            (None, Some(_)) => true,
            _ => false,
        };
        if take_discrete {
            self.discrete
                .pop_front()
                .map(|(_, e)| (e, ControlKind::Discrete))
        } else {
            self.continuous
                .pop_front()
                .map(|(_, e)| (e, ControlKind::Continuous))
        }
    }

    fn seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Multi-producer, single-consumer event queue
#[derive(Debug)]
pub struct EventQueue {
    lanes: Mutex<Lanes>,
    continuous_capacity: usize,
    discrete_capacity: usize,
    /// Signalled when an event is queued (single consumer)
    items: Notify,
    /// Signalled when a discrete slot frees up
    space: Notify,
}

impl EventQueue {
    pub fn new(continuous_capacity: usize, discrete_capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            continuous_capacity: continuous_capacity.max(1),
            discrete_capacity: discrete_capacity.max(1),
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Queue an event
    ///
    /// Continuous events never wait. Discrete events wait while the reserve
    /// is full.
    pub async fn push(&self, event: ControlEvent) -> Result<PushOutcome, EngineError> {
        match event.kind() {
            ControlKind::Continuous => self.push_continuous(event),
            ControlKind::Discrete => self.push_discrete(event).await,
        }
    }

    fn push_continuous(&self, event: ControlEvent) -> Result<PushOutcome, EngineError> {
        let outcome = {
            let mut lanes = self.lanes.lock();
            if lanes.closed {
                return Err(EngineError::QueueClosed);
            }
            let mut outcome = PushOutcome::Queued;
            if lanes.continuous.len() >= self.continuous_capacity {
                lanes.continuous.pop_front();
                outcome = PushOutcome::DroppedOldest;
            }
            let seq = lanes.seq();
            lanes.continuous.push_back((seq, event));
            outcome
        };
        self.items.notify_one();
        Ok(outcome)
    }

    async fn push_discrete(&self, event: ControlEvent) -> Result<PushOutcome, EngineError> {
        loop {
            // Register interest before checking so a pop in between is not missed
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut lanes = self.lanes.lock();
                if lanes.closed {
                    return Err(EngineError::QueueClosed);
                }
                if lanes.discrete.len() < self.discrete_capacity {
                    let seq = lanes.seq();
                    lanes.discrete.push_back((seq, event));
                    drop(lanes);
                    self.items.notify_one();
                    return Ok(PushOutcome::Queued);
                }
            }

            notified.await;
        }
    }

    /// Next event in arrival order, waiting if the queue is empty
    ///
    /// Returns `None` once the queue is closed. Cancel safe.
    pub async fn pop(&self) -> Option<ControlEvent> {
        loop {
            let notified = self.items.notified();
            {
                let mut lanes = self.lanes.lock();
                if lanes.closed {
                    return None;
                }
                if let Some((event, kind)) = lanes.pop_oldest() {
                    drop(lanes);
                    if kind == ControlKind::Discrete {
                        self.space.notify_waiters();
                    }
                    return Some(event);
                }
            }
            notified.await;
        }
    }

    /// Close the queue: pending events are discarded and waiters released
    pub fn close(&self) {
        {
            let mut lanes = self.lanes.lock();
            lanes.closed = true;
            lanes.continuous.clear();
            lanes.discrete.clear();
        }
        self.items.notify_one();
        self.space.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.lock().closed
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.continuous.len() + lanes.discrete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ControlIdentity, ControlValue};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn knob(raw: u8) -> ControlEvent {
        ControlEvent::continuous(
            ControlIdentity::continuous("midi", 0, 1),
            raw as f64,
            raw as f64 / 127.0,
            Instant::now(),
        )
        .unwrap()
    }

    fn button(note: u16) -> ControlEvent {
        ControlEvent::discrete(ControlIdentity::discrete("midi", 0, note), 127.0, true, Instant::now())
    }

    #[tokio::test]
    async fn test_pops_in_arrival_order_across_lanes() {
        let queue = EventQueue::new(8, 8);
        queue.push(knob(1)).await.unwrap();
        queue.push(button(60)).await.unwrap();
        queue.push(knob(2)).await.unwrap();

        assert_eq!(queue.pop().await.unwrap().raw_value, 1.0);
        assert_eq!(queue.pop().await.unwrap().identity.control_number, 60);
        assert_eq!(queue.pop().await.unwrap().raw_value, 2.0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_continuous_drops_oldest_when_full() {
        let queue = EventQueue::new(2, 2);
        assert_eq!(queue.push(knob(1)).await.unwrap(), PushOutcome::Queued);
        assert_eq!(queue.push(knob(2)).await.unwrap(), PushOutcome::Queued);
        assert_eq!(queue.push(knob(3)).await.unwrap(), PushOutcome::DroppedOldest);

        assert_eq!(queue.pop().await.unwrap().value, ControlValue::Continuous(2.0 / 127.0));
        assert_eq!(queue.pop().await.unwrap().value, ControlValue::Continuous(3.0 / 127.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discrete_waits_for_room() {
        let queue = Arc::new(EventQueue::new(2, 1));
        queue.push(button(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(button(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop().await.unwrap().identity.control_number, 1);
        assert_eq!(producer.await.unwrap().unwrap(), PushOutcome::Queued);
        assert_eq!(queue.pop().await.unwrap().identity.control_number, 2);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(EventQueue::new(4, 4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;

        queue.push(knob(42)).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap().raw_value, 42.0);
    }

    #[tokio::test]
    async fn test_close_releases_everyone() {
        let queue = Arc::new(EventQueue::new(4, 1));
        queue.push(button(1)).await.unwrap();

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(button(2)).await })
        };
        tokio::task::yield_now().await;

        queue.close();
        assert_eq!(blocked.await.unwrap(), Err(EngineError::QueueClosed));
        assert!(queue.pop().await.is_none());
        assert_eq!(queue.push(knob(1)).await, Err(EngineError::QueueClosed));
    }
}
