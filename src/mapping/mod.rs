//! Bindings, mapping table and binding resolution
//!
//! A [`Binding`] ties one [`ControlIdentity`] to a backend parameter, with a
//! [`Transform`] and a [`ThrottlePolicy`]. Bindings live in an immutable
//! [`MappingTable`] snapshot, published through a [`MappingStore`] so the
//! dispatch path always sees a whole table.

pub mod resolver;
pub mod table;
pub mod transform;

use crate::error::MappingError;
use crate::event::{ControlIdentity, ControlKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use resolver::{BindingResolver, LearnCapture, ObservedRange, Resolution};
pub use table::{MappingStore, MappingTable};
pub use transform::{Curve, Transform, TransformInput};

/// Target parameter: backend id plus an opaque parameter name
///
/// Parameter names are only validated by the adapter that receives them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterRef {
    #[serde(rename = "backend")]
    pub backend_id: String,
    pub parameter: String,
}

impl ParameterRef {
    pub fn new(backend_id: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.backend_id, self.parameter)
    }
}

/// Smoothing applied after the transform
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Smoothing {
    #[default]
    None,
    /// Exponential moving average, `alpha` in `(0, 1]`
    Ema { alpha: f64 },
}

/// Rate limiting policy of one binding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottlePolicy {
    /// Minimum spacing between two sends
    pub min_interval: Duration,
    pub smoothing: Smoothing,
    /// Keep the latest throttled value and flush it when the interval ends
    pub coalesce: bool,
}

impl ThrottlePolicy {
    /// Knobs and faders: 50 ms, latest value wins
    pub fn continuous_default() -> Self {
        Self {
            min_interval: Duration::from_millis(50),
            smoothing: Smoothing::None,
            coalesce: true,
        }
    }

    /// Buttons: every event goes through
    pub fn discrete_default() -> Self {
        Self {
            min_interval: Duration::ZERO,
            smoothing: Smoothing::None,
            coalesce: false,
        }
    }

    pub fn for_kind(kind: ControlKind) -> Self {
        match kind {
            ControlKind::Continuous => Self::continuous_default(),
            ControlKind::Discrete => Self::discrete_default(),
        }
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        // Profiles store the interval in whole milliseconds
        if self.min_interval.subsec_nanos() % 1_000_000 != 0 {
            return Err(MappingError::InvalidThrottle(format!(
                "min interval {:?} is not a whole number of milliseconds",
                self.min_interval
            )));
        }
        match self.smoothing {
            Smoothing::Ema { alpha } if !(alpha > 0.0 && alpha <= 1.0) => Err(
                MappingError::InvalidThrottle(format!("EMA alpha {} must be in (0, 1]", alpha)),
            ),
            _ => Ok(()),
        }
    }
}

/// Binding of one control to one target parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub identity: ControlIdentity,
    pub target: ParameterRef,
    pub transform: Transform,
    pub throttle: ThrottlePolicy,
    pub enabled: bool,
    pub description: Option<String>,
}

impl Binding {
    /// Enabled binding with an identity transform and the kind's default throttle
    pub fn new(identity: ControlIdentity, target: ParameterRef) -> Self {
        let throttle = ThrottlePolicy::for_kind(identity.kind);
        Self {
            identity,
            target,
            transform: Transform::default(),
            throttle,
            enabled: true,
            description: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        self.transform.validate()?;
        self.throttle.validate()
    }
}
