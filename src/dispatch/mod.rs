//! Rate-limited dispatcher
//!
//! Synchronous state machine driven by the engine loop. Each call takes an
//! explicit `now`, so the throttle clock is the time the event is handled,
//! and tests can drive it without a runtime.
//!
//! Per binding: transform, optional EMA, then either send immediately (the
//! throttle window is open), keep the value as pending for a scheduled flush
//! (`coalesce`), or drop it. Pending values are flushed at
//! `last_sent_at + min_interval` unless they are within epsilon of the last
//! sent value.

pub mod state;


use crate::event::{ControlEvent, ControlIdentity, ParamValue};
use crate::mapping::{Binding, MappingTable, Smoothing};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;

pub use state::{DispatchState, Phase};

/// Redundant-send thresholds for scheduled flushes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchConfig {
    /// Absolute threshold
    pub epsilon: f64,
    /// Threshold relative to the last sent value
    pub relative_epsilon: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            relative_epsilon: 0.001,
        }
    }
}

impl DispatchConfig {
    /// Whether `candidate` is close enough to `last` to skip sending it
    pub fn is_redundant(&self, candidate: ParamValue, last: ParamValue) -> bool {
        match (candidate, last) {
            (ParamValue::Float(a), ParamValue::Float(b)) => {
                (a - b).abs() <= self.epsilon.max(b.abs() * self.relative_epsilon)
            }
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

/// Why a value is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReason {
    /// Throttle window was open when the event arrived
    Immediate,
    /// Coalesced value sent when its window closed
    Flush,
}

/// One value to deliver to a backend adapter
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub binding: Arc<Binding>,
    pub value: ParamValue,
    pub reason: DispatchReason,
}

impl Dispatch {
    pub fn identity(&self) -> &ControlIdentity {
        &self.binding.identity
    }
}

/// Per-binding throttling, coalescing and smoothing
#[derive(Debug, Default)]
pub struct Dispatcher {
    config: DispatchConfig,
    states: HashMap<ControlIdentity, DispatchState>,
    /// Flush deadlines; an entry is live only while it matches `flush_at`
    deadlines: BinaryHeap<Reverse<(Instant, ControlIdentity)>>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    pub fn set_config(&mut self, config: DispatchConfig) {
        self.config = config;
    }

    /// Handle a resolved event. Returns the value to send now, if any.
    pub fn on_event(
        &mut self,
        binding: &Arc<Binding>,
        event: &ControlEvent,
        now: Instant,
    ) -> Option<Dispatch> {
        let state = self
            .states
            .entry(binding.identity.clone())
            .or_insert_with(|| DispatchState::new(binding.clone()));

        // Rebound identity: start over from idle
        if !state.belongs_to(binding) {
            trace!("Binding for {} changed, resetting dispatch state", binding.identity);
            *state = DispatchState::new(binding.clone());
        }

        let mut value = binding.transform.apply_event(event);
        if let (Smoothing::Ema { alpha }, ParamValue::Float(v)) = (binding.throttle.smoothing, value) {
            value = ParamValue::Float(state.smooth(alpha, v));
        }

        if state.window_open(now) {
            state.record_send(value, now);
            state.flush_at = None;
            return Some(Dispatch {
                binding: binding.clone(),
                value,
                reason: DispatchReason::Immediate,
            });
        }

        if !binding.throttle.coalesce {
            trace!("Dropping throttled value {} for {}", value, binding.identity);
            return None;
        }

        state.pending_value = Some(value);
        if state.flush_at.is_none() {
            if let Some(last) = state.last_sent_at {
                let at = last + binding.throttle.min_interval;
                state.flush_at = Some(at);
                self.deadlines.push(Reverse((at, binding.identity.clone())));
            }
        }
        None
    }

    /// Earliest live flush deadline
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, identity))) = self.deadlines.peek() {
            let live = self
                .states
                .get(identity)
                .is_some_and(|s| s.flush_at == Some(*at));
            if live {
                return Some(*at);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Run every flush due at `now` against the current table
    pub fn flush_due(&mut self, table: &MappingTable, now: Instant) -> Vec<Dispatch> {
        let mut out = Vec::new();

        while let Some(Reverse((at, _))) = self.deadlines.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, identity))) = self.deadlines.pop() else {
                break;
            };

            let Some(state) = self.states.get_mut(&identity) else {
                continue;
            };
            if state.flush_at != Some(at) {
                continue;
            }
            state.flush_at = None;

            // The binding may have been removed, replaced or disabled since
            let current = table.get(&identity).filter(|b| b.enabled);
            let Some(binding) = current.filter(|b| state.belongs_to(b)).cloned() else {
                trace!("Discarding pending value for stale binding {}", identity);
                self.states.remove(&identity);
                continue;
            };

            let Some(pending) = state.pending_value.take() else {
                continue;
            };
            if let Some(last) = state.last_sent_value {
                if self.config.is_redundant(pending, last) {
                    trace!("Skipping redundant flush {} for {}", pending, identity);
                    continue;
                }
            }

            state.record_send(pending, now);
            out.push(Dispatch {
                binding,
                value: pending,
                reason: DispatchReason::Flush,
            });
        }

        out
    }

    /// Drop the state of bindings that are no longer current in `table`
    pub fn reconcile(&mut self, table: &MappingTable) -> usize {
        let before = self.states.len();
        self.states.retain(|identity, state| {
            table
                .get(identity)
                .is_some_and(|b| b.enabled && state.belongs_to(b))
        });
        before - self.states.len()
    }

    /// Forget the last send so the next event for `identity` is sent fresh
    pub fn send_failed(&mut self, identity: &ControlIdentity) {
        if let Some(state) = self.states.get_mut(identity) {
            state.last_sent_value = None;
            state.last_sent_at = None;
        }
    }

    /// Discard all state without sending. Returns the number of pending values dropped.
    pub fn clear(&mut self) -> usize {
        let pending = self.pending_count();
        self.states.clear();
        self.deadlines.clear();
        pending
    }

    pub fn phase(&self, identity: &ControlIdentity, now: Instant) -> Phase {
        self.states
            .get(identity)
            .map_or(Phase::Idle, |s| s.phase(now))
    }

    pub fn state(&self, identity: &ControlIdentity) -> Option<&DispatchState> {
        self.states.get(identity)
    }

    pub fn pending_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| s.pending_value.is_some())
            .count()
    }

    /// Number of bindings with live state
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
