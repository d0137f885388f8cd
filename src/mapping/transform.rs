//! Value transforms (range remap, invert, response curve)

use crate::error::MappingError;
use crate::event::{ControlEvent, ControlValue, ParamValue};
use serde::{Deserialize, Serialize};

/// Which event value feeds the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformInput {
    /// Canonical `[0, 1]` value
    #[default]
    Normalized,
    /// Transport value (0-127 for a CC, 0-16383 for pitch bend)
    Raw,
}

/// Response curve applied to the normalized position `t` in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    #[default]
    Linear,
    /// `t^k`: k > 1 is finer near the low end
    Exponential(f64),
    /// `ln(1 + k·t) / ln(1 + k)`: finer near the high end
    Logarithmic(f64),
}

impl Curve {
    fn apply(self, t: f64) -> f64 {
        match self {
            Curve::Linear => t,
            Curve::Exponential(k) => t.powf(k),
            Curve::Logarithmic(k) => (1.0 + k * t).ln() / (1.0 + k).ln(),
        }
    }
}

/// Pure `float -> float` mapping from the input range to the target range
///
/// Endpoints are exact: `apply(in_lo) == out_lo` and `apply(in_hi) == out_hi`,
/// swapped when `invert` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub input: TransformInput,
    pub in_lo: f64,
    pub in_hi: f64,
    pub out_lo: f64,
    pub out_hi: f64,
    pub invert: bool,
    pub curve: Curve,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            input: TransformInput::Normalized,
            in_lo: 0.0,
            in_hi: 1.0,
            out_lo: 0.0,
            out_hi: 1.0,
            invert: false,
            curve: Curve::Linear,
        }
    }
}

impl Transform {
    /// Normalized input remapped onto `[out_lo, out_hi]`
    pub fn linear(out_lo: f64, out_hi: f64) -> Self {
        Self {
            out_lo,
            out_hi,
            ..Self::default()
        }
    }

    /// Raw transport values in `[in_lo, in_hi]` remapped onto `[out_lo, out_hi]`
    pub fn raw(in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> Self {
        Self {
            input: TransformInput::Raw,
            in_lo,
            in_hi,
            out_lo,
            out_hi,
            ..Self::default()
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        let bounds = [self.in_lo, self.in_hi, self.out_lo, self.out_hi];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(MappingError::InvalidTransform(
                "range bounds must be finite".to_string(),
            ));
        }
        if self.in_lo == self.in_hi {
            return Err(MappingError::InvalidTransform(format!(
                "empty input range [{}, {}]",
                self.in_lo, self.in_hi
            )));
        }
        match self.curve {
            Curve::Linear => Ok(()),
            Curve::Exponential(k) | Curve::Logarithmic(k) if k.is_finite() && k > 0.0 => Ok(()),
            Curve::Exponential(k) | Curve::Logarithmic(k) => Err(MappingError::InvalidTransform(
                format!("curve exponent {} must be a positive number", k),
            )),
        }
    }

    /// Apply to a scalar in the input space
    pub fn apply(&self, x: f64) -> f64 {
        let (lo, hi) = if self.in_lo <= self.in_hi {
            (self.in_lo, self.in_hi)
        } else {
            (self.in_hi, self.in_lo)
        };
        let x = x.clamp(lo, hi);

        let mut t = (x - self.in_lo) / (self.in_hi - self.in_lo);
        if self.invert {
            t = 1.0 - t;
        }
        let t = self.curve.apply(t);

        // Written as a weighted sum so that t = 1 yields out_hi exactly
        self.out_lo * (1.0 - t) + self.out_hi * t
    }

    /// Apply to an event, producing the value delivered to the backend
    ///
    /// Discrete events bypass the range remap: they yield a bool, flipped
    /// when `invert` is set.
    pub fn apply_event(&self, event: &ControlEvent) -> ParamValue {
        match event.value {
            ControlValue::Discrete(on) => ParamValue::Bool(on != self.invert),
            ControlValue::Continuous(normalized) => {
                let x = match self.input {
                    TransformInput::Normalized => normalized,
                    TransformInput::Raw => event.raw_value,
                };
                ParamValue::Float(self.apply(x))
            }
        }
    }
}
