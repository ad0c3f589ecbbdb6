//! Parametric baseline cumulative hazards for the two competing causes.
//!
//! Each cause carries one fitted curve from the flexible parametric family
//!
//! ```text
//! H(t) = exp(b0 + b1*ln t + b2*sqrt(t) + b3/sqrt(t) + b4*ln(t)/sqrt(t))
//! ```
//!
//! The constructor proves monotonicity rather than sampling for it. Writing
//! g(t) for the exponent and phi(t) = t^(3/2) * g'(t),
//!
//! ```text
//! phi(t) = b1*sqrt(t) + (b2/2)*t - b3/2 + b4 - (b4/2)*ln t
//! ```
//!
//! whenever b1 >= 0, b2 >= 0 and b4 <= 0, phi is non-decreasing on t > 0,
//! so phi(t_min) > 0 implies g' > 0 — hence H strictly increasing — on the
//! whole domain [t_min, inf). Constant sets outside that provable family,
//! or with phi(t_min) <= 0, are rejected at construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cause {
    /// Death with breast cancer as the recorded underlying cause.
    BreastCancer,
    /// Death from any other or unknown cause.
    OtherCauses,
}

#[derive(Debug, Error)]
pub enum HazardError {
    #[error("non-finite hazard coefficient {0}")]
    NonFiniteCoefficient(f64),
    #[error("validity floor must be positive and finite, got {0}")]
    InvalidFloor(f64),
    #[error("cumulative hazard is not provably monotone on [{t_min}, inf): {detail}")]
    NonMonotone { t_min: f64, detail: &'static str },
    #[error("horizon {horizon} is outside the curve's valid domain [{t_min}, inf)")]
    InvalidHorizon { horizon: f64, t_min: f64 },
}

/// One cause's fitted baseline curve, valid on `[t_min, inf)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HazardCurve {
    intercept: f64,
    log_t: f64,
    sqrt_t: f64,
    inv_sqrt_t: f64,
    log_over_sqrt_t: f64,
    t_min: f64,
}

impl HazardCurve {
    pub fn new(
        intercept: f64,
        log_t: f64,
        sqrt_t: f64,
        inv_sqrt_t: f64,
        log_over_sqrt_t: f64,
        t_min: f64,
    ) -> Result<Self, HazardError> {
        for &b in &[intercept, log_t, sqrt_t, inv_sqrt_t, log_over_sqrt_t] {
            if !b.is_finite() {
                return Err(HazardError::NonFiniteCoefficient(b));
            }
        }
        if !t_min.is_finite() || t_min <= 0.0 {
            return Err(HazardError::InvalidFloor(t_min));
        }
        let curve = Self {
            intercept,
            log_t,
            sqrt_t,
            inv_sqrt_t,
            log_over_sqrt_t,
            t_min,
        };
        curve.verify_monotone()?;
        Ok(curve)
    }

    /// Analytic monotonicity proof; see the module docs for the derivation.
    fn verify_monotone(&self) -> Result<(), HazardError> {
        if self.log_t < 0.0 || self.sqrt_t < 0.0 || self.log_over_sqrt_t > 0.0 {
            return Err(HazardError::NonMonotone {
                t_min: self.t_min,
                detail: "requires b1 >= 0, b2 >= 0 and b4 <= 0",
            });
        }
        if self.phi(self.t_min) <= 0.0 {
            return Err(HazardError::NonMonotone {
                t_min: self.t_min,
                detail: "derivative is non-positive at the domain floor",
            });
        }
        Ok(())
    }

    /// phi(t) = t^(3/2) * g'(t); same sign as the hazard derivative.
    fn phi(&self, t: f64) -> f64 {
        self.log_t * t.sqrt() + 0.5 * self.sqrt_t * t - 0.5 * self.inv_sqrt_t
            + self.log_over_sqrt_t
            - 0.5 * self.log_over_sqrt_t * t.ln()
    }

    fn log_cumulative_hazard(&self, t: f64) -> f64 {
        let sqrt = t.sqrt();
        let ln = t.ln();
        self.intercept
            + self.log_t * ln
            + self.sqrt_t * sqrt
            + self.inv_sqrt_t / sqrt
            + self.log_over_sqrt_t * ln / sqrt
    }

    pub fn t_min(&self) -> f64 {
        self.t_min
    }

    pub fn cumulative_hazard(&self, t: f64) -> Result<f64, HazardError> {
        if !t.is_finite() || t < self.t_min {
            return Err(HazardError::InvalidHorizon {
                horizon: t,
                t_min: self.t_min,
            });
        }
        Ok(self.log_cumulative_hazard(t).exp())
    }

    /// Baseline survival exp(-H(t)) for a reference patient.
    pub fn survival(&self, t: f64) -> Result<f64, HazardError> {
        Ok((-self.cumulative_hazard(t)?).exp())
    }
}

/// The pair of cause-specific baseline curves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaselineHazardModel {
    breast: HazardCurve,
    other: HazardCurve,
}

impl BaselineHazardModel {
    pub fn new(breast: HazardCurve, other: HazardCurve) -> Self {
        Self { breast, other }
    }

    pub fn curve(&self, cause: Cause) -> &HazardCurve {
        match cause {
            Cause::BreastCancer => &self.breast,
            Cause::OtherCauses => &self.other,
        }
    }

    /// Earliest horizon at which both curves are valid.
    pub fn t_min(&self) -> f64 {
        self.breast.t_min.max(self.other.t_min)
    }

    /// The published fitted constants for the two causes, calibrated on
    /// whole-year horizons; valid from one year after diagnosis.
    pub fn published() -> Result<Self, HazardError> {
        let breast = HazardCurve::new(0.742_440_2, 0.0, 0.0, -7.527_762, -1.812_513, 1.0)?;
        let other = HazardCurve::new(-6.052_919, 1.079_863, 0.325_532_1, 0.0, 0.0, 1.0)?;
        Ok(Self::new(breast, other))
    }
}
