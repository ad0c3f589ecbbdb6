//! Declarative clinical constraints on imputed continuous draws.
//!
//! A [`ConstraintTable`] maps (variable, pathological classification) to a
//! closed plausible interval. Draws outside the matched interval are
//! squeezed to the nearest bound; that is audit data, not an error. A
//! classification with no matching entry imposes no constraint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("invalid interval for {variable}/{class}: [{low}, {high}]")]
    InvalidInterval {
        variable: String,
        class: String,
        low: f64,
        high: f64,
    },
}

/// Counters for constraint clipping within one replicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqueezeAudit {
    pub clipped_low: u64,
    pub clipped_high: u64,
    pub passed: u64,
}

impl SqueezeAudit {
    pub fn clipped(&self) -> u64 {
        self.clipped_low + self.clipped_high
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintTable {
    entries: BTreeMap<(String, String), (f64, f64)>,
}

impl ConstraintTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the allowed interval for `variable` under classification
    /// `class`. Bounds must be finite, ordered, and non-negative.
    pub fn insert(
        &mut self,
        variable: &str,
        class: &str,
        low: f64,
        high: f64,
    ) -> Result<(), ConstraintError> {
        if !low.is_finite() || !high.is_finite() || low < 0.0 || low > high {
            return Err(ConstraintError::InvalidInterval {
                variable: variable.to_string(),
                class: class.to_string(),
                low,
                high,
            });
        }
        self.entries
            .insert((variable.to_string(), class.to_string()), (low, high));
        Ok(())
    }

    pub fn interval(&self, variable: &str, class: &str) -> Option<(f64, f64)> {
        self.entries
            .get(&(variable.to_string(), class.to_string()))
            .copied()
    }

    /// Clips `value` into the interval matched by (`variable`, `class`),
    /// counting the outcome. Unmatched classifications pass through
    /// untouched and unaudited.
    pub fn squeeze(&self, variable: &str, class: &str, value: f64, audit: &mut SqueezeAudit) -> f64 {
        match self.interval(variable, class) {
            Some((low, _)) if value < low => {
                audit.clipped_low += 1;
                low
            }
            Some((_, high)) if value > high => {
                audit.clipped_high += 1;
                high
            }
            Some(_) => {
                audit.passed += 1;
                value
            }
            None => value,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tumour-size (mm) intervals by pathological T stage and node-count
/// intervals by pathological N stage.
pub fn clinical_defaults() -> ConstraintTable {
    let mut table = ConstraintTable::new();
    let size: &[(&str, f64, f64)] = &[
        ("1MI", 0.1, 1.0),
        ("1A", 1.0, 5.0),
        ("1B", 5.0, 10.0),
        ("1C", 10.0, 20.0),
        ("2", 20.0, 50.0),
        ("3", 50.0, 200.0),
    ];
    let nodes: &[(&str, f64, f64)] = &[
        ("0", 0.0, 0.0),
        ("1", 1.0, 3.0),
        ("2", 4.0, 9.0),
        ("3", 10.0, 90.0),
    ];
    for &(class, low, high) in size {
        // Literal intervals above satisfy the insert invariant.
        let _ = table.insert("size", class, low, high);
    }
    for &(class, low, high) in nodes {
        let _ = table.insert("nodes", class, low, high);
    }
    table
}
