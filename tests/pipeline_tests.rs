//! End-to-end pipeline tests: impute a synthetic cohort, score each
//! completed replicate, and pool the per-replicate summaries.

use mipredict::config::{ConditionalModelSpec, ImputationConfig, PredictorMask};
use mipredict::impute::constraint::{self, ConstraintTable};
use mipredict::impute::{ImputationEngine, ImputationResult};
use mipredict::pool::{self, ReplicateEstimate};
use mipredict::risk::{
    Detection, MenopausalStatus, PatientCovariates, RiskModel, Treatment, score,
};
use mipredict::table::{ColumnSchema, DataTable, MISSING, VariableKind};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Deterministic synthetic cohort with missingness in size, grade and er.
/// Columns: age, size, nodes, grade, er, time.
fn synthetic_cohort(n: usize) -> DataTable {
    let schema = vec![
        ColumnSchema::new("age", VariableKind::Continuous),
        ColumnSchema::new("size", VariableKind::Continuous),
        ColumnSchema::new("nodes", VariableKind::Continuous),
        ColumnSchema::new("grade", VariableKind::Categorical { levels: 3 }),
        ColumnSchema::new("er", VariableKind::Binary),
        ColumnSchema::new("time", VariableKind::Continuous),
    ];
    let mut values = Array2::zeros((n, schema.len()));
    let mut pt = Vec::with_capacity(n);
    for i in 0..n {
        let age = 40.0 + (i % 35) as f64;
        let size = 8.0 + (i % 40) as f64;
        let nodes = (i % 5) as f64;
        let grade = (i % 3) as f64;
        let er = if i % 4 == 0 { 0.0 } else { 1.0 };
        let time = 2.0 + (i % 12) as f64 / 2.0;
        values[[i, 0]] = age;
        values[[i, 1]] = if i % 7 == 3 { MISSING } else { size };
        values[[i, 2]] = nodes;
        values[[i, 3]] = if i % 11 == 5 { MISSING } else { grade };
        values[[i, 4]] = if i % 9 == 2 { MISSING } else { er };
        values[[i, 5]] = time;
        pt.push(if size <= 20.0 { "1C" } else { "2" }.to_string());
    }
    let mut labels = BTreeMap::new();
    labels.insert("size".to_string(), pt);
    DataTable::new(schema, values, labels).unwrap()
}

fn cohort_config(table: &DataTable, replicates: usize, seed: u64) -> ImputationConfig {
    let mut mask = PredictorMask::all(table.n_cols());
    mask.exclude_everywhere(table.column_index("time").unwrap());
    ImputationConfig {
        replicates,
        iterations: 5,
        seed,
        models: vec![
            (
                "size".to_string(),
                ConditionalModelSpec::PredictiveMeanMatching { donors: 5 },
            ),
            (
                "grade".to_string(),
                ConditionalModelSpec::Multinomial { levels: 3 },
            ),
            ("er".to_string(), ConditionalModelSpec::BinaryLogistic),
        ],
        mask,
    }
}

fn run(table: &DataTable, replicates: usize, seed: u64) -> ImputationResult {
    let config = cohort_config(table, replicates, seed);
    let constraints = constraint::clinical_defaults();
    ImputationEngine::new(&config, &constraints)
        .run(table)
        .unwrap()
}

#[test]
fn no_sentinel_survives_imputation() {
    let table = synthetic_cohort(60);
    let result = run(&table, 3, 17);
    assert_eq!(result.m(), 3);
    for replicate in &result.replicates {
        for j in 0..replicate.n_cols() {
            assert_eq!(replicate.missing_count(j), 0);
        }
    }
}

#[test]
fn observed_cells_are_identical_across_replicates() {
    let table = synthetic_cohort(60);
    let result = run(&table, 3, 17);
    for replicate in &result.replicates {
        for i in 0..table.n_rows() {
            for j in 0..table.n_cols() {
                if !table.is_missing(i, j) {
                    assert_eq!(replicate.value(i, j), table.value(i, j));
                }
            }
        }
    }
}

#[test]
fn constrained_imputations_fall_inside_their_interval() {
    let table = synthetic_cohort(60);
    let result = run(&table, 3, 23);
    let constraints = constraint::clinical_defaults();
    let size = table.column_index("size").unwrap();
    for replicate in &result.replicates {
        for i in 0..table.n_rows() {
            if table.is_missing(i, size) {
                let class = table.class_label("size", i).unwrap();
                let (low, high) = constraints.interval("size", class).unwrap();
                let v = replicate.value(i, size);
                assert!(
                    (low..=high).contains(&v),
                    "row {i}: imputed size {v} outside [{low}, {high}]"
                );
            }
        }
    }
}

#[test]
fn identical_seed_gives_byte_identical_pipeline_output() {
    let table = synthetic_cohort(60);
    let a = run(&table, 4, 99);
    let b = run(&table, 4, 99);
    for (ra, rb) in a.replicates.iter().zip(&b.replicates) {
        assert_eq!(ra.values(), rb.values());
    }
    assert_eq!(a.audits, b.audits);

    let pooled_a = pool_mean_risk(&a);
    let pooled_b = pool_mean_risk(&b);
    assert_eq!(pooled_a.estimate.to_bits(), pooled_b.estimate.to_bits());
    assert_eq!(pooled_a.std_error.to_bits(), pooled_b.std_error.to_bits());
    assert_eq!(pooled_a.p_value.to_bits(), pooled_b.p_value.to_bits());
}

#[test]
fn different_seeds_give_different_chains() {
    let table = synthetic_cohort(60);
    let a = run(&table, 2, 1);
    let b = run(&table, 2, 2);
    let any_difference = a
        .replicates
        .iter()
        .zip(&b.replicates)
        .any(|(ra, rb)| ra.values() != rb.values());
    assert!(any_difference);
}

#[test]
fn three_row_squeeze_scenario() {
    // One missing size classified 1A with interval [0, 5]; the only donor
    // value is 7, which must come back squeezed to 5.
    let schema = vec![
        ColumnSchema::new("age", VariableKind::Continuous),
        ColumnSchema::new("size", VariableKind::Continuous),
    ];
    let mut values = Array2::zeros((3, 2));
    values[[0, 0]] = 51.0;
    values[[1, 0]] = 63.0;
    values[[2, 0]] = 58.0;
    values[[0, 1]] = 7.0;
    values[[1, 1]] = 7.0;
    values[[2, 1]] = MISSING;
    let mut labels = BTreeMap::new();
    labels.insert(
        "size".to_string(),
        vec![String::new(), String::new(), "1A".to_string()],
    );
    let table = DataTable::new(schema, values, labels).unwrap();

    let mut constraints = ConstraintTable::new();
    constraints.insert("size", "1A", 0.0, 5.0).unwrap();
    let mut mask = PredictorMask::all(2);
    // Intercept-only model: the regression mean and every donor equal 7.
    mask.exclude(1, 0);
    let config = ImputationConfig {
        replicates: 3,
        iterations: 4,
        seed: 5,
        models: vec![(
            "size".to_string(),
            ConditionalModelSpec::PredictiveMeanMatching { donors: 5 },
        )],
        mask,
    };
    let result = ImputationEngine::new(&config, &constraints)
        .run(&table)
        .unwrap();
    for (replicate, audit) in result.replicates.iter().zip(&result.audits) {
        assert_eq!(replicate.value(2, 1), 5.0);
        assert!(audit.clipped_high >= 1);
    }
}

/// Scores every row of every replicate at 10 years and pools the mean
/// breast-cancer mortality across replicates.
fn pool_mean_risk(result: &ImputationResult) -> pool::PooledEstimate {
    let model = RiskModel::published().unwrap();
    let mut estimates = Vec::with_capacity(result.m());
    for replicate in &result.replicates {
        let age = replicate.column_index("age").unwrap();
        let size = replicate.column_index("size").unwrap();
        let nodes = replicate.column_index("nodes").unwrap();
        let grade = replicate.column_index("grade").unwrap();
        let er = replicate.column_index("er").unwrap();
        let mut risks = Vec::with_capacity(replicate.n_rows());
        for i in 0..replicate.n_rows() {
            let patient = PatientCovariates {
                age: replicate.value(i, age),
                size_mm: replicate.value(i, size),
                grade: replicate.value(i, grade) as u8 + 1,
                nodes: replicate.value(i, nodes),
                detection: Detection::Unknown,
                er_positive: replicate.value(i, er) == 1.0,
                her2_positive: None,
                ki67_positive: None,
            };
            let treatment = Treatment::none(MenopausalStatus::Unknown);
            let risk = score(&patient, &treatment, 10.0, &model).unwrap();
            assert!(risk.breast.mortality.is_finite());
            risks.push(risk.breast.mortality);
        }
        let n = risks.len() as f64;
        let mean = risks.iter().sum::<f64>() / n;
        let var = risks.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        estimates.push(ReplicateEstimate::new(mean, var / n, n - 1.0));
    }
    pool::pool(&estimates, 0.95).unwrap()
}

#[test]
fn end_to_end_pooled_risk_is_a_probability() {
    let table = synthetic_cohort(60);
    let result = run(&table, 4, 7);
    let pooled = pool_mean_risk(&result);
    assert!(pooled.estimate > 0.0 && pooled.estimate < 1.0);
    assert!(pooled.std_error >= 0.0);
    assert!(pooled.ci_lower <= pooled.estimate && pooled.estimate <= pooled.ci_upper);
    assert!((0.0..=1.0).contains(&pooled.p_value));
    assert!(pooled.between_variance >= 0.0);
}
