//! Per-binding dispatch state

use crate::event::ParamValue;
use crate::mapping::Binding;
use std::sync::Arc;
use tokio::time::Instant;

/// Throttle phase of one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No pending work and the throttle window has elapsed
    Idle,
    /// A coalesced value waits for its flush
    Pending,
    /// A value was sent and the throttle window is still open
    Sent,
}

/// Mutable state of one active binding, owned by the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchState {
    /// Binding instance this state was created for
    pub(crate) binding: Arc<Binding>,
    pub last_sent_value: Option<ParamValue>,
    pub last_sent_at: Option<Instant>,
    pub pending_value: Option<ParamValue>,
    pub ema_state: Option<f64>,
    /// Scheduled flush, if any
    pub flush_at: Option<Instant>,
}

impl DispatchState {
    pub fn new(binding: Arc<Binding>) -> Self {
        Self {
            binding,
            last_sent_value: None,
            last_sent_at: None,
            pending_value: None,
            ema_state: None,
            flush_at: None,
        }
    }

    /// Whether this state belongs to `binding` (same instance, not just equal)
    pub fn belongs_to(&self, binding: &Arc<Binding>) -> bool {
        Arc::ptr_eq(&self.binding, binding)
    }

    /// Whether the throttle window allows a send at `now`
    pub fn window_open(&self, now: Instant) -> bool {
        match self.last_sent_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.binding.throttle.min_interval,
        }
    }

    /// Fold `value` into the EMA, returning the smoothed value
    pub fn smooth(&mut self, alpha: f64, value: f64) -> f64 {
        let next = match self.ema_state {
            Some(prev) => alpha * value + (1.0 - alpha) * prev,
            None => value,
        };
        self.ema_state = Some(next);
        next
    }

    pub fn record_send(&mut self, value: ParamValue, at: Instant) {
        self.last_sent_value = Some(value);
        self.last_sent_at = Some(at);
        self.pending_value = None;
    }

    pub fn phase(&self, now: Instant) -> Phase {
        if self.pending_value.is_some() {
            Phase::Pending
        } else if self.window_open(now) {
            Phase::Idle
        } else {
            Phase::Sent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ControlIdentity;
    use crate::mapping::ParameterRef;
    use std::time::Duration;

    fn state() -> DispatchState {
        DispatchState::new(Arc::new(Binding::new(
            ControlIdentity::continuous("midi", 0, 1),
            ParameterRef::new("elmo", "fog"),
        )))
    }

    #[test]
    fn test_phase_transitions() {
        let mut s = state();
        let t0 = Instant::now();
        assert_eq!(s.phase(t0), Phase::Idle);

        s.record_send(ParamValue::Float(0.5), t0);
        assert_eq!(s.phase(t0 + Duration::from_millis(10)), Phase::Sent);

        s.pending_value = Some(ParamValue::Float(0.7));
        assert_eq!(s.phase(t0 + Duration::from_millis(10)), Phase::Pending);

        s.pending_value = None;
        assert_eq!(s.phase(t0 + Duration::from_millis(50)), Phase::Idle);
    }

    #[test]
    fn test_smooth_initializes_on_first_sample() {
        let mut s = state();
        assert_eq!(s.smooth(0.5, 1.0), 1.0);
        assert_eq!(s.smooth(0.5, 0.0), 0.5);
        assert_eq!(s.smooth(0.5, 0.0), 0.25);
    }
}
