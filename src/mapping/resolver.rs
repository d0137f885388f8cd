//! Binding resolution, unbound reporting and learn mode

use super::{Binding, MappingTable};
use crate::event::{ControlEvent, ControlIdentity};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Entries kept in the unbound rate limiter before stale ones are pruned
const UNBOUND_PRUNE_THRESHOLD: usize = 1024;

/// Outcome of resolving one event against the table
#[derive(Debug, Clone)]
pub enum Resolution {
    Bound(Arc<Binding>),
    /// Binding exists but is disabled: dropped silently
    Disabled,
    Unbound,
}

/// Value range observed during a learn capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedRange {
    /// Min/max of the normalized value
    pub min: f64,
    pub max: f64,
    /// Min/max of the transport value
    pub raw_min: f64,
    pub raw_max: f64,
}

impl ObservedRange {
    fn from_event(event: &ControlEvent) -> Self {
        let v = event.value.as_unit();
        Self {
            min: v,
            max: v,
            raw_min: event.raw_value,
            raw_max: event.raw_value,
        }
    }

    fn include(&mut self, event: &ControlEvent) {
        let v = event.value.as_unit();
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.raw_min = self.raw_min.min(event.raw_value);
        self.raw_max = self.raw_max.max(event.raw_value);
    }
}

/// Identity captured by learn mode, offered to the caller to build a binding
#[derive(Debug, Clone, PartialEq)]
pub struct LearnCapture {
    pub session: u64,
    pub identity: ControlIdentity,
    pub observed: ObservedRange,
    pub samples: usize,
}

#[derive(Debug)]
struct Capture {
    identity: ControlIdentity,
    observed: ObservedRange,
    samples: usize,
    deadline: Instant,
}

#[derive(Debug)]
struct LearnSession {
    id: u64,
    window: Duration,
    capture: Option<Capture>,
}

/// Resolves events to bindings
///
/// Owned by the dispatcher loop, so none of its state is shared.
#[derive(Debug)]
pub struct BindingResolver {
    unbound_interval: Duration,
    last_unbound_report: HashMap<ControlIdentity, Instant>,
    learn: Option<LearnSession>,
}

impl BindingResolver {
    pub fn new(unbound_interval: Duration) -> Self {
        Self {
            unbound_interval,
            last_unbound_report: HashMap::new(),
            learn: None,
        }
    }

    /// Look the event up in `table`, feeding learn mode with unbound events
    pub fn resolve(&mut self, table: &MappingTable, event: &ControlEvent, now: Instant) -> Resolution {
        match table.get(&event.identity) {
            Some(binding) if binding.enabled => Resolution::Bound(binding.clone()),
            Some(_) => Resolution::Disabled,
            None => {
                self.observe_unbound(event, now);
                Resolution::Unbound
            }
        }
    }

    /// Whether an unbound event for `identity` should be reported now
    pub fn should_report_unbound(&mut self, identity: &ControlIdentity, now: Instant) -> bool {
        if let Some(last) = self.last_unbound_report.get(identity) {
            if now.duration_since(*last) < self.unbound_interval {
                return false;
            }
        }

        if self.last_unbound_report.len() >= UNBOUND_PRUNE_THRESHOLD {
            let interval = self.unbound_interval;
            self.last_unbound_report
                .retain(|_, last| now.duration_since(*last) < interval);
        }
        self.last_unbound_report.insert(identity.clone(), now);
        true
    }

    /// Start a learn session, replacing any running one
    pub fn begin_learn(&mut self, session: u64, window: Duration) {
        info!("Learn mode armed (session {}, window {:?})", session, window);
        self.learn = Some(LearnSession {
            id: session,
            window,
            capture: None,
        });
    }

    /// Cancel a learn session. Returns false if it is no longer active.
    pub fn cancel_learn(&mut self, session: u64) -> bool {
        match &self.learn {
            Some(learn) if learn.id == session => {
                info!("Learn mode cancelled (session {})", session);
                self.learn = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_learning(&self) -> bool {
        self.learn.is_some()
    }

    pub fn learn_session(&self) -> Option<u64> {
        self.learn.as_ref().map(|l| l.id)
    }

    /// End of the capture window, once an identity has been captured
    pub fn learn_deadline(&self) -> Option<Instant> {
        self.learn
            .as_ref()
            .and_then(|l| l.capture.as_ref())
            .map(|c| c.deadline)
    }

    /// Complete the learn session if its capture window has elapsed
    pub fn poll_learn(&mut self, now: Instant) -> Option<LearnCapture> {
        let due = self.learn_deadline().is_some_and(|deadline| deadline <= now);
        if !due {
            return None;
        }

        let session = self.learn.take()?;
        let capture = session.capture?;
        info!(
            "Learn mode captured {} ({} samples, range {:.3}..{:.3})",
            capture.identity, capture.samples, capture.observed.min, capture.observed.max
        );
        Some(LearnCapture {
            session: session.id,
            identity: capture.identity,
            observed: capture.observed,
            samples: capture.samples,
        })
    }

    fn observe_unbound(&mut self, event: &ControlEvent, now: Instant) {
        let Some(learn) = self.learn.as_mut() else {
            return;
        };

        match learn.capture.as_mut() {
            None => {
                debug!("Learn mode capturing {}", event.identity);
                learn.capture = Some(Capture {
                    identity: event.identity.clone(),
                    observed: ObservedRange::from_event(event),
                    samples: 1,
                    deadline: now + learn.window,
                });
            }
            Some(capture) if capture.identity == event.identity => {
                capture.observed.include(event);
                capture.samples += 1;
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ParameterRef;

    fn knob(cc: u16, raw: u8, at: Instant) -> ControlEvent {
        ControlEvent::continuous(
            ControlIdentity::continuous("midi", 0, cc),
            raw as f64,
            raw as f64 / 127.0,
            at,
        )
        .unwrap()
    }

    fn table_with(cc: u16, enabled: bool) -> MappingTable {
        let mut binding = Binding::new(
            ControlIdentity::continuous("midi", 0, cc),
            ParameterRef::new("elmo", "fog"),
        );
        binding.enabled = enabled;
        MappingTable::from_bindings(vec![binding]).unwrap()
    }

    #[test]
    fn test_resolve_bound_disabled_unbound() {
        let mut resolver = BindingResolver::new(Duration::from_secs(1));
        let now = Instant::now();

        let table = table_with(1, true);
        assert!(matches!(resolver.resolve(&table, &knob(1, 0, now), now), Resolution::Bound(_)));
        assert!(matches!(resolver.resolve(&table, &knob(2, 0, now), now), Resolution::Unbound));

        let table = table_with(1, false);
        assert!(matches!(resolver.resolve(&table, &knob(1, 0, now), now), Resolution::Disabled));
    }

    #[test]
    fn test_unbound_reports_are_rate_limited() {
        let mut resolver = BindingResolver::new(Duration::from_millis(1000));
        let id = ControlIdentity::continuous("midi", 0, 5);
        let t0 = Instant::now();

        assert!(resolver.should_report_unbound(&id, t0));
        assert!(!resolver.should_report_unbound(&id, t0 + Duration::from_millis(500)));
        assert!(resolver.should_report_unbound(&id, t0 + Duration::from_millis(1000)));

        let other = ControlIdentity::continuous("midi", 0, 6);
        assert!(resolver.should_report_unbound(&other, t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn test_learn_captures_first_unbound_identity() {
        let mut resolver = BindingResolver::new(Duration::from_secs(1));
        let table = table_with(1, true);
        let t0 = Instant::now();

        resolver.begin_learn(7, Duration::from_millis(500));
        assert_eq!(resolver.learn_deadline(), None);

        // Bound events are not captured
        resolver.resolve(&table, &knob(1, 10, t0), t0);
        assert_eq!(resolver.learn_deadline(), None);

        resolver.resolve(&table, &knob(3, 40, t0), t0);
        resolver.resolve(&table, &knob(3, 90, t0 + Duration::from_millis(100)), t0);
        resolver.resolve(&table, &knob(4, 127, t0 + Duration::from_millis(150)), t0);
        resolver.resolve(&table, &knob(3, 20, t0 + Duration::from_millis(200)), t0);

        assert_eq!(resolver.learn_deadline(), Some(t0 + Duration::from_millis(500)));
        assert_eq!(resolver.poll_learn(t0 + Duration::from_millis(499)), None);

        let capture = resolver.poll_learn(t0 + Duration::from_millis(500)).unwrap();
        assert_eq!(capture.session, 7);
        assert_eq!(capture.identity, ControlIdentity::continuous("midi", 0, 3));
        assert_eq!(capture.samples, 3);
        assert_eq!(capture.observed.raw_min, 20.0);
        assert_eq!(capture.observed.raw_max, 90.0);
        assert!(!resolver.is_learning());
    }

    #[test]
    fn test_zero_window_completes_on_first_event() {
        let mut resolver = BindingResolver::new(Duration::from_secs(1));
        let now = Instant::now();

        resolver.begin_learn(1, Duration::ZERO);
        resolver.resolve(&MappingTable::new(), &knob(9, 64, now), now);

        let capture = resolver.poll_learn(now).unwrap();
        assert_eq!(capture.samples, 1);
        assert_eq!(capture.observed.min, capture.observed.max);
    }

    #[test]
    fn test_cancel_learn() {
        let mut resolver = BindingResolver::new(Duration::from_secs(1));
        resolver.begin_learn(1, Duration::from_millis(100));
        resolver.begin_learn(2, Duration::from_millis(100));

        assert!(!resolver.cancel_learn(1));
        assert!(resolver.cancel_learn(2));
        assert!(!resolver.is_learning());
    }
}
