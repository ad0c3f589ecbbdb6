//! Run configuration: conditional-model specification, predictor masking,
//! and the TOML-backed settings file consumed by the CLI.
//!
//! Model dispatch is resolved here, at configuration time, as a tagged
//! variant per variable. Nothing downstream interprets variable names to
//! choose a fitting routine.

use crate::table::{DataTable, VariableKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Which conditional model imputes a given variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionalModelSpec {
    /// Logistic regression with a Bernoulli draw from the fitted probability.
    BinaryLogistic,
    /// Bayesian linear regression followed by donor matching on the
    /// predicted mean; imputed values are always observed donor values.
    PredictiveMeanMatching { donors: usize },
    /// Baseline-category logit over `levels` classes with a categorical draw.
    Multinomial { levels: usize },
}

impl ConditionalModelSpec {
    /// Whether this spec can impute a column of the given kind.
    pub fn matches(&self, kind: VariableKind) -> bool {
        match (*self, kind) {
            (ConditionalModelSpec::BinaryLogistic, VariableKind::Binary) => true,
            (ConditionalModelSpec::PredictiveMeanMatching { .. }, VariableKind::Continuous) => true,
            (
                ConditionalModelSpec::Multinomial { levels },
                VariableKind::Categorical { levels: k },
            ) => levels == k,
            _ => false,
        }
    }
}

/// Per-target predictor inclusion over all table columns.
///
/// A target never predicts itself; that exclusion is structural and cannot
/// be re-enabled. Further exclusions mark variables that are derived from or
/// redundant with the target (outcome leakage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorMask {
    allowed: Vec<Vec<bool>>,
}

impl PredictorMask {
    /// All predictors allowed for every target (except self).
    pub fn all(n_columns: usize) -> Self {
        let mut allowed = vec![vec![true; n_columns]; n_columns];
        for (t, row) in allowed.iter_mut().enumerate() {
            row[t] = false;
        }
        Self { allowed }
    }

    pub fn n_columns(&self) -> usize {
        self.allowed.len()
    }

    pub fn exclude(&mut self, target: usize, predictor: usize) {
        self.allowed[target][predictor] = false;
    }

    /// Removes `predictor` from every target's model.
    pub fn exclude_everywhere(&mut self, predictor: usize) {
        for row in &mut self.allowed {
            row[predictor] = false;
        }
    }

    #[inline]
    pub fn allows(&self, target: usize, predictor: usize) -> bool {
        target != predictor && self.allowed[target][predictor]
    }

    /// Predictor column indices admitted for `target`, in column order.
    pub fn predictors_for(&self, target: usize) -> Vec<usize> {
        (0..self.n_columns())
            .filter(|&p| self.allows(target, p))
            .collect()
    }
}

/// Everything the imputation engine needs besides the table itself.
#[derive(Debug, Clone)]
pub struct ImputationConfig {
    /// Number of completed datasets M.
    pub replicates: usize,
    /// Chained-equation sweeps per replicate.
    pub iterations: usize,
    /// Run seed; per-replicate streams are derived from it.
    pub seed: u64,
    /// (variable name, model) for every in-scope variable with missingness.
    pub models: Vec<(String, ConditionalModelSpec)>,
    pub mask: PredictorMask,
}

pub const DEFAULT_ITERATIONS: usize = 10;
pub const DEFAULT_REPLICATES: usize = 10;
pub const DEFAULT_DONORS: usize = 5;

/// The conditional models for the breast-cancer cohort schema produced by
/// [`crate::data::load_cohort`].
pub fn cohort_models() -> Vec<(String, ConditionalModelSpec)> {
    vec![
        (
            "size".to_string(),
            ConditionalModelSpec::PredictiveMeanMatching {
                donors: DEFAULT_DONORS,
            },
        ),
        (
            "nodes".to_string(),
            ConditionalModelSpec::PredictiveMeanMatching {
                donors: DEFAULT_DONORS,
            },
        ),
        (
            "grade".to_string(),
            ConditionalModelSpec::Multinomial { levels: 3 },
        ),
        ("screen".to_string(), ConditionalModelSpec::BinaryLogistic),
        ("er".to_string(), ConditionalModelSpec::BinaryLogistic),
        ("her2".to_string(), ConditionalModelSpec::BinaryLogistic),
        ("ki67".to_string(), ConditionalModelSpec::BinaryLogistic),
    ]
}

/// Default mask for the cohort schema: follow-up time is excluded from every
/// conditional model because it is a near-deterministic function of the
/// vital-status dates that define the outcome.
pub fn cohort_mask(table: &DataTable) -> PredictorMask {
    let mut mask = PredictorMask::all(table.n_cols());
    if let Some(time) = table.column_index("time") {
        mask.exclude_everywhere(time);
    }
    mask
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("replicates must be at least 1, got {0}")]
    BadReplicates(usize),
    #[error("iterations must be at least 1, got {0}")]
    BadIterations(usize),
    #[error("horizon must be positive and finite, got {0}")]
    BadHorizon(f64),
    #[error("confidence must lie in (0, 1), got {0}")]
    BadConfidence(f64),
}

/// CLI-facing settings, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_replicates")]
    pub replicates: usize,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_horizon")]
    pub horizon_years: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_replicates() -> usize {
    DEFAULT_REPLICATES
}

fn default_iterations() -> usize {
    DEFAULT_ITERATIONS
}

fn default_horizon() -> f64 {
    10.0
}

fn default_confidence() -> f64 {
    0.95
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            replicates: DEFAULT_REPLICATES,
            iterations: DEFAULT_ITERATIONS,
            seed: 0,
            horizon_years: default_horizon(),
            confidence: default_confidence(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replicates == 0 {
            return Err(ConfigError::BadReplicates(self.replicates));
        }
        if self.iterations == 0 {
            return Err(ConfigError::BadIterations(self.iterations));
        }
        if !self.horizon_years.is_finite() || self.horizon_years <= 0.0 {
            return Err(ConfigError::BadHorizon(self.horizon_years));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::BadConfidence(self.confidence));
        }
        Ok(())
    }
}
