//! Chained-equations imputation engine.
//!
//! One replicate is one sequential chain: initialize every missing cell from
//! its column's observed marginal, then sweep the visit sequence for a fixed
//! number of iterations, refitting each variable's conditional model on the
//! originally-observed rows and redrawing the missing rows in place.
//! Continuous draws are squeezed through the constraint table using the
//! row's pathological classification. The M replicates are independent
//! chains with derived seeds and run in parallel; results are merged in
//! replicate order.

use crate::config::{ConditionalModelSpec, ImputationConfig};
use crate::impute::constraint::{ConstraintTable, SqueezeAudit};
use crate::impute::models::{
    self, ModelError,
};
use crate::table::{DataTable, VariableKind};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImputeError {
    #[error(
        "conditional model for '{variable}' failed at iteration {iteration}, replicate {replicate}: {source}"
    )]
    FitFailure {
        variable: String,
        iteration: usize,
        replicate: usize,
        #[source]
        source: ModelError,
    },
    #[error("variable '{0}' is not a column of the input table")]
    UnknownVariable(String),
    #[error("variable '{0}' appears more than once in the model list")]
    DuplicateVariable(String),
    #[error("column '{0}' has missing values but no conditional model")]
    UnmodeledMissing(String),
    #[error("model spec for '{variable}' does not match column kind {kind:?}")]
    SpecMismatch {
        variable: String,
        kind: VariableKind,
    },
    #[error("variable '{0}' has no observed values to condition on")]
    NothingObserved(String),
    #[error("replicate {replicate} left {count} missing values in '{variable}' after imputation")]
    IncompleteReplicate {
        replicate: usize,
        variable: String,
        count: usize,
    },
    #[error("at least one replicate is required")]
    NoReplicates,
    #[error("at least one iteration is required")]
    NoIterations,
    #[error("predictor mask covers {mask} columns but the table has {table}")]
    MaskShape { mask: usize, table: usize },
}

/// Output of one engine run: the untouched pre-imputation table at index 0
/// plus M completed replicates addressable as 1..=M via [`Self::replicate`].
#[derive(Debug, Clone)]
pub struct ImputationResult {
    pub template: DataTable,
    pub replicates: Vec<DataTable>,
    pub audits: Vec<SqueezeAudit>,
}

impl ImputationResult {
    /// Replicate by 1-based index, with 0 returning the template.
    pub fn replicate(&self, index: usize) -> Option<&DataTable> {
        if index == 0 {
            Some(&self.template)
        } else {
            self.replicates.get(index - 1)
        }
    }

    pub fn m(&self) -> usize {
        self.replicates.len()
    }
}

/// One variable's slot in the visit sequence, resolved to column indices.
struct VariableTask {
    name: String,
    column: usize,
    spec: ConditionalModelSpec,
    constrained: bool,
    predictors: Vec<usize>,
    observed_rows: Vec<usize>,
    missing_rows: Vec<usize>,
}

struct Plan {
    tasks: Vec<VariableTask>,
}

pub struct ImputationEngine<'a> {
    config: &'a ImputationConfig,
    constraints: &'a ConstraintTable,
}

impl<'a> ImputationEngine<'a> {
    pub fn new(config: &'a ImputationConfig, constraints: &'a ConstraintTable) -> Self {
        Self {
            config,
            constraints,
        }
    }

    pub fn run(&self, table: &DataTable) -> Result<ImputationResult, ImputeError> {
        if self.config.replicates == 0 {
            return Err(ImputeError::NoReplicates);
        }
        if self.config.iterations == 0 {
            return Err(ImputeError::NoIterations);
        }
        if self.config.mask.n_columns() != table.n_cols() {
            return Err(ImputeError::MaskShape {
                mask: self.config.mask.n_columns(),
                table: table.n_cols(),
            });
        }
        let plan = self.plan(table)?;
        log::info!(
            "imputing {} variables over {} iterations, {} replicates",
            plan.tasks.len(),
            self.config.iterations,
            self.config.replicates
        );

        let outcomes: Result<Vec<(DataTable, SqueezeAudit)>, ImputeError> = (1..=self
            .config
            .replicates)
            .into_par_iter()
            .map(|replicate| self.run_replicate(table, &plan, replicate))
            .collect();
        let outcomes = outcomes?;

        let (replicates, audits) = outcomes.into_iter().unzip();
        Ok(ImputationResult {
            template: table.clone(),
            replicates,
            audits,
        })
    }

    /// Resolves names to columns, checks spec/kind agreement, and orders the
    /// visit sequence lowest-missingness-first.
    fn plan(&self, table: &DataTable) -> Result<Plan, ImputeError> {
        let mut tasks = Vec::new();
        for (position, (name, spec)) in self.config.models.iter().enumerate() {
            if self.config.models[..position].iter().any(|(n, _)| n == name) {
                return Err(ImputeError::DuplicateVariable(name.clone()));
            }
            let column = table
                .column_index(name)
                .ok_or_else(|| ImputeError::UnknownVariable(name.clone()))?;
            let kind = table.kind(column);
            if !spec.matches(kind) {
                return Err(ImputeError::SpecMismatch {
                    variable: name.clone(),
                    kind,
                });
            }
            let missing_rows: Vec<usize> = (0..table.n_rows())
                .filter(|&i| table.is_missing(i, column))
                .collect();
            if missing_rows.is_empty() {
                log::debug!("'{name}' is fully observed; skipping");
                continue;
            }
            let observed_rows: Vec<usize> = (0..table.n_rows())
                .filter(|&i| !table.is_missing(i, column))
                .collect();
            if observed_rows.is_empty() {
                return Err(ImputeError::NothingObserved(name.clone()));
            }
            tasks.push(VariableTask {
                name: name.clone(),
                column,
                spec: *spec,
                constrained: matches!(kind, VariableKind::Continuous),
                predictors: self.config.mask.predictors_for(column),
                observed_rows,
                missing_rows,
            });
        }

        // Every column with missingness must be covered by a model.
        for j in 0..table.n_cols() {
            if table.missing_count(j) > 0 && !tasks.iter().any(|t| t.column == j) {
                let name = table.schema()[j].name.clone();
                if !self.config.models.iter().any(|(n, _)| *n == name) {
                    return Err(ImputeError::UnmodeledMissing(name));
                }
            }
        }

        let tasks: Vec<VariableTask> = tasks
            .into_iter()
            .sorted_by_key(|t| t.missing_rows.len())
            .collect();
        for task in &tasks {
            log::debug!(
                "visit '{}': {} missing, {} predictors",
                task.name,
                task.missing_rows.len(),
                task.predictors.len()
            );
        }
        Ok(Plan { tasks })
    }

    fn run_replicate(
        &self,
        table: &DataTable,
        plan: &Plan,
        replicate: usize,
    ) -> Result<(DataTable, SqueezeAudit), ImputeError> {
        let mut rng = StdRng::seed_from_u64(derive_seed(self.config.seed, replicate as u64));
        let mut work = table.clone();
        let mut audit = SqueezeAudit::default();

        // Marginal-draw initialization so the first sweep has a complete
        // predictor space.
        for task in &plan.tasks {
            let observed: Vec<f64> = task
                .observed_rows
                .iter()
                .map(|&i| table.value(i, task.column))
                .collect();
            for &row in &task.missing_rows {
                let value = observed[rng.gen_range(0..observed.len())];
                work.set_value(row, task.column, value);
            }
        }

        for iteration in 1..=self.config.iterations {
            for task in &plan.tasks {
                self.impute_variable(&mut work, task, iteration, replicate, &mut rng, &mut audit)?;
            }
        }

        // The engine must never return a partially imputed replicate.
        for j in 0..work.n_cols() {
            let count = work.missing_count(j);
            if count > 0 {
                return Err(ImputeError::IncompleteReplicate {
                    replicate,
                    variable: work.schema()[j].name.clone(),
                    count,
                });
            }
        }

        log::debug!(
            "replicate {replicate}: {} draws squeezed ({} passed)",
            audit.clipped(),
            audit.passed
        );
        Ok((work, audit))
    }

    fn impute_variable(
        &self,
        work: &mut DataTable,
        task: &VariableTask,
        iteration: usize,
        replicate: usize,
        rng: &mut StdRng,
        audit: &mut SqueezeAudit,
    ) -> Result<(), ImputeError> {
        let x_obs = design_matrix(work, &task.observed_rows, &task.predictors);
        let x_mis = design_matrix(work, &task.missing_rows, &task.predictors);
        let y_obs = Array1::from_iter(
            task.observed_rows
                .iter()
                .map(|&i| work.value(i, task.column)),
        );

        let draws = match task.spec {
            ConditionalModelSpec::PredictiveMeanMatching { donors } => {
                models::impute_pmm(&x_obs, &y_obs, &x_mis, donors, rng)
            }
            ConditionalModelSpec::BinaryLogistic => {
                models::impute_binary_logistic(&x_obs, &y_obs, &x_mis, rng)
            }
            ConditionalModelSpec::Multinomial { levels } => {
                models::impute_multinomial(&x_obs, &y_obs, &x_mis, levels, rng)
            }
        }
        .map_err(|source| ImputeError::FitFailure {
            variable: task.name.clone(),
            iteration,
            replicate,
            source,
        })?;

        for (&row, value) in task.missing_rows.iter().zip(draws) {
            let value = if task.constrained {
                match work.class_label(&task.name, row) {
                    Some(class) => self.constraints.squeeze(&task.name, class, value, audit),
                    None => value,
                }
            } else {
                value
            };
            work.set_value(row, task.column, value);
        }
        Ok(())
    }
}

/// SplitMix64 finalizer over (seed, replicate); distinct replicates get
/// independent, reproducible streams.
fn derive_seed(seed: u64, replicate: u64) -> u64 {
    let mut z = seed ^ replicate.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Intercept plus the mask-selected predictors, with categorical predictors
/// expanded into `levels - 1` indicator columns.
fn design_matrix(work: &DataTable, rows: &[usize], predictors: &[usize]) -> Array2<f64> {
    let width: usize = 1
        + predictors
            .iter()
            .map(|&j| match work.kind(j) {
                VariableKind::Categorical { levels } => levels - 1,
                _ => 1,
            })
            .sum::<usize>();
    let mut design = Array2::zeros((rows.len(), width));
    for (r, &row) in rows.iter().enumerate() {
        design[[r, 0]] = 1.0;
        let mut c = 1;
        for &j in predictors {
            let v = work.value(row, j);
            match work.kind(j) {
                VariableKind::Categorical { levels } => {
                    for level in 1..levels {
                        design[[r, c]] = if v == level as f64 { 1.0 } else { 0.0 };
                        c += 1;
                    }
                }
                _ => {
                    design[[r, c]] = v;
                    c += 1;
                }
            }
        }
    }
    design
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictorMask;
    use crate::table::{ColumnSchema, MISSING};
    use ndarray::array;
    use std::collections::BTreeMap;

    fn small_table() -> DataTable {
        let schema = vec![
            ColumnSchema::new("age", VariableKind::Continuous),
            ColumnSchema::new("size", VariableKind::Continuous),
        ];
        let values = array![
            [52.0, 7.0],
            [61.0, 7.0],
            [47.0, MISSING],
        ];
        let mut labels = BTreeMap::new();
        labels.insert(
            "size".to_string(),
            vec![String::new(), String::new(), "1A".to_string()],
        );
        DataTable::new(schema, values, labels).unwrap()
    }

    fn config(table: &DataTable) -> ImputationConfig {
        let mut mask = PredictorMask::all(table.n_cols());
        // Intercept-only model for size: the lone donor value is 7.
        mask.exclude(table.column_index("size").unwrap(), 0);
        ImputationConfig {
            replicates: 2,
            iterations: 3,
            seed: 11,
            models: vec![(
                "size".to_string(),
                ConditionalModelSpec::PredictiveMeanMatching { donors: 5 },
            )],
            mask,
        }
    }

    #[test]
    fn squeezes_constrained_draw_into_interval() {
        let table = small_table();
        let config = config(&table);
        let mut constraints = ConstraintTable::new();
        constraints.insert("size", "1A", 0.0, 5.0).unwrap();
        let engine = ImputationEngine::new(&config, &constraints);

        let result = engine.run(&table).unwrap();
        assert_eq!(result.m(), 2);
        for (replicate, audit) in result.replicates.iter().zip(&result.audits) {
            // PMM can only draw the donor value 7, which the constraint
            // squeezes to the upper bound.
            assert_eq!(replicate.value(2, 1), 5.0);
            assert_eq!(audit.clipped_high, config.iterations as u64);
        }
    }

    #[test]
    fn template_keeps_the_sentinel() {
        let table = small_table();
        let config = config(&table);
        let constraints = ConstraintTable::new();
        let engine = ImputationEngine::new(&config, &constraints);
        let result = engine.run(&table).unwrap();
        assert!(result.template.is_missing(2, 1));
        assert!(result.replicate(0).unwrap().is_missing(2, 1));
        assert!(!result.replicate(1).unwrap().is_missing(2, 1));
        assert!(result.replicate(3).is_none());
    }

    #[test]
    fn single_class_target_fails_with_full_context() {
        let schema = vec![
            ColumnSchema::new("age", VariableKind::Continuous),
            ColumnSchema::new("er", VariableKind::Binary),
        ];
        let values = array![
            [52.0, 1.0],
            [61.0, 1.0],
            [47.0, 1.0],
            [58.0, MISSING],
        ];
        let table = DataTable::new(schema, values, BTreeMap::new()).unwrap();
        let config = ImputationConfig {
            replicates: 1,
            iterations: 2,
            seed: 3,
            models: vec![("er".to_string(), ConditionalModelSpec::BinaryLogistic)],
            mask: PredictorMask::all(2),
        };
        let constraints = ConstraintTable::new();
        let engine = ImputationEngine::new(&config, &constraints);
        match engine.run(&table).unwrap_err() {
            ImputeError::FitFailure {
                variable,
                iteration,
                replicate,
                source,
            } => {
                assert_eq!(variable, "er");
                assert_eq!(iteration, 1);
                assert_eq!(replicate, 1);
                assert!(matches!(source, ModelError::SingleClass));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unmodeled_missing_column_is_rejected() {
        let table = small_table();
        let mut config = config(&table);
        config.models.clear();
        let constraints = ConstraintTable::new();
        let engine = ImputationEngine::new(&config, &constraints);
        assert!(matches!(
            engine.run(&table),
            Err(ImputeError::UnmodeledMissing(name)) if name == "size"
        ));
    }

    #[test]
    fn duplicate_model_entries_are_rejected() {
        let table = small_table();
        let mut config = config(&table);
        config.models.push((
            "size".to_string(),
            ConditionalModelSpec::PredictiveMeanMatching { donors: 3 },
        ));
        let constraints = ConstraintTable::new();
        let engine = ImputationEngine::new(&config, &constraints);
        assert!(matches!(
            engine.run(&table),
            Err(ImputeError::DuplicateVariable(name)) if name == "size"
        ));
    }

    #[test]
    fn spec_kind_mismatch_is_rejected() {
        let table = small_table();
        let mut config = config(&table);
        config.models = vec![("size".to_string(), ConditionalModelSpec::BinaryLogistic)];
        let constraints = ConstraintTable::new();
        let engine = ImputationEngine::new(&config, &constraints);
        assert!(matches!(
            engine.run(&table),
            Err(ImputeError::SpecMismatch { .. })
        ));
    }

    #[test]
    fn identical_seeds_reproduce_replicates() {
        let table = small_table();
        let config = config(&table);
        let constraints = ConstraintTable::new();
        let engine = ImputationEngine::new(&config, &constraints);
        let a = engine.run(&table).unwrap();
        let b = engine.run(&table).unwrap();
        for (ra, rb) in a.replicates.iter().zip(&b.replicates) {
            assert_eq!(ra.values(), rb.values());
        }
    }

    #[test]
    fn derived_seeds_differ_between_replicates() {
        assert_ne!(derive_seed(0, 1), derive_seed(0, 2));
        assert_ne!(derive_seed(1, 1), derive_seed(2, 1));
        assert_eq!(derive_seed(5, 3), derive_seed(5, 3));
    }
}
