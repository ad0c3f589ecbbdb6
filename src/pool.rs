//! Rubin's rules: combining per-replicate estimates into one inference.
//!
//! The pooled point estimate is the mean of the M replicate estimates; the
//! total variance is the within-imputation mean plus the between-imputation
//! sample variance inflated by (1 + 1/M). Degrees of freedom follow the
//! Barnard–Rubin small-sample correction using the complete-data degrees of
//! freedom carried by each replicate. Confidence intervals and two-sided
//! p-values use a t-distribution on the pooled degrees of freedom.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pooling requires at least two replicates, got {0}")]
    TooFewReplicates(usize),
    #[error("replicate {index} has an invalid {what}: {value}")]
    InvalidReplicate {
        index: usize,
        what: &'static str,
        value: f64,
    },
    #[error("confidence level must lie in (0, 1), got {0}")]
    InvalidConfidence(f64),
    #[error("component lists must all contain the same number of replicates")]
    RaggedComponents,
    #[error("t-distribution construction failed: {0}")]
    Distribution(String),
}

/// One replicate's contribution: a point estimate, its within-replicate
/// sampling variance, and the complete-data degrees of freedom of the fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReplicateEstimate {
    pub estimate: f64,
    pub variance: f64,
    pub dof: f64,
}

impl ReplicateEstimate {
    pub fn new(estimate: f64, variance: f64, dof: f64) -> Self {
        Self {
            estimate,
            variance,
            dof,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PooledEstimate {
    pub estimate: f64,
    pub within_variance: f64,
    pub between_variance: f64,
    pub total_variance: f64,
    pub std_error: f64,
    pub dof: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
}

/// Degrees of freedom ceiling; beyond this the t-distribution is numerically
/// normal and statrs needs a finite value.
const DOF_CEILING: f64 = 1e9;

fn barnard_rubin(m: f64, within: f64, between: f64, total: f64, complete_dof: f64) -> f64 {
    if between <= 0.0 || total <= 0.0 {
        // No between-imputation spread: fall back to the complete-data dof.
        return complete_dof.min(DOF_CEILING);
    }
    let lambda = (1.0 + 1.0 / m) * between / total;
    let df_old = if within > 0.0 {
        let r = (1.0 + 1.0 / m) * between / within;
        (m - 1.0) * (1.0 + 1.0 / r).powi(2)
    } else {
        m - 1.0
    };
    let df_obs = (complete_dof + 1.0) / (complete_dof + 3.0) * complete_dof * (1.0 - lambda);
    let df = if df_obs > 0.0 {
        1.0 / (1.0 / df_old + 1.0 / df_obs)
    } else {
        df_old
    };
    df.clamp(1.0, DOF_CEILING)
}

/// Pools M replicate estimates of one scalar quantity.
pub fn pool(
    replicates: &[ReplicateEstimate],
    conf_level: f64,
) -> Result<PooledEstimate, PoolError> {
    let m = replicates.len();
    if m < 2 {
        return Err(PoolError::TooFewReplicates(m));
    }
    if !(conf_level > 0.0 && conf_level < 1.0) {
        return Err(PoolError::InvalidConfidence(conf_level));
    }
    for (index, r) in replicates.iter().enumerate() {
        if !r.estimate.is_finite() {
            return Err(PoolError::InvalidReplicate {
                index,
                what: "estimate",
                value: r.estimate,
            });
        }
        if !r.variance.is_finite() || r.variance < 0.0 {
            return Err(PoolError::InvalidReplicate {
                index,
                what: "variance",
                value: r.variance,
            });
        }
        if !r.dof.is_finite() || r.dof <= 0.0 {
            return Err(PoolError::InvalidReplicate {
                index,
                what: "dof",
                value: r.dof,
            });
        }
    }

    let m_f = m as f64;
    let estimate = replicates.iter().map(|r| r.estimate).sum::<f64>() / m_f;
    let within_variance = replicates.iter().map(|r| r.variance).sum::<f64>() / m_f;
    let between_variance = replicates
        .iter()
        .map(|r| (r.estimate - estimate).powi(2))
        .sum::<f64>()
        / (m_f - 1.0);
    let total_variance = within_variance + (1.0 + 1.0 / m_f) * between_variance;
    let std_error = total_variance.sqrt();
    let complete_dof = replicates.iter().map(|r| r.dof).sum::<f64>() / m_f;
    let dof = barnard_rubin(
        m_f,
        within_variance,
        between_variance,
        total_variance,
        complete_dof,
    );

    let t = StudentsT::new(0.0, 1.0, dof).map_err(|e| PoolError::Distribution(e.to_string()))?;
    let alpha = 1.0 - conf_level;
    let critical = t.inverse_cdf(1.0 - alpha / 2.0);
    let (ci_lower, ci_upper) = (estimate - critical * std_error, estimate + critical * std_error);
    let p_value = if std_error > 0.0 {
        2.0 * (1.0 - t.cdf((estimate / std_error).abs()))
    } else if estimate == 0.0 {
        1.0
    } else {
        0.0
    };

    Ok(PooledEstimate {
        estimate,
        within_variance,
        between_variance,
        total_variance,
        std_error,
        dof,
        ci_lower,
        ci_upper,
        p_value,
    })
}

/// Pools a vector quantity component-wise. `components[j]` holds the M
/// replicate estimates of component j; every component must carry the same
/// number of replicates.
pub fn pool_vector(
    components: &[Vec<ReplicateEstimate>],
    conf_level: f64,
) -> Result<Vec<PooledEstimate>, PoolError> {
    if let Some(first) = components.first() {
        if components.iter().any(|c| c.len() != first.len()) {
            return Err(PoolError::RaggedComponents);
        }
    }
    components
        .iter()
        .map(|c| pool(c, conf_level))
        .collect()
}
