//! Cohort ingestion at the external interface.
//!
//! One clean, merged TSV comes in; a typed [`DataTable`] comes out. The
//! mapping from external column names to internal fields is declared once
//! in [`cohort_fields`] and never widened at runtime. Nulls in imputable
//! columns become the missing sentinel; nulls anywhere else are errors.

use crate::risk::scorer::{
    ChemoGeneration, Detection, MenopausalStatus, PatientCovariates, Treatment,
};
use crate::table::{ColumnSchema, DataTable, MISSING, TableError, VariableKind};
use ndarray::Array2;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("column '{0}' missing from input")]
    MissingColumn(String),
    #[error("column '{column}' row {row}: non-finite value {value}")]
    NonFinite {
        column: String,
        row: usize,
        value: f64,
    },
    #[error("column '{column}' row {row}: {value} is not a valid code")]
    InvalidCode {
        column: String,
        row: usize,
        value: f64,
    },
    #[error("column '{column}' row {row}: null not allowed here")]
    NullNotAllowed { column: String, row: usize },
    #[error("row {row}: column '{column}' still missing; score replicates, not the template")]
    IncompleteRow { column: String, row: usize },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// External column name, internal field, kind, and the code offset applied
/// on load (external grade is 1..=3, internally levels are 0-based).
struct FieldSpec {
    external: &'static str,
    internal: &'static str,
    kind: VariableKind,
    offset: f64,
    allow_missing: bool,
}

const fn field(
    external: &'static str,
    internal: &'static str,
    kind: VariableKind,
    offset: f64,
    allow_missing: bool,
) -> FieldSpec {
    FieldSpec {
        external,
        internal,
        kind,
        offset,
        allow_missing,
    }
}

/// The fixed cohort schema. Imputable clinical covariates allow the missing
/// sentinel; follow-up, outcome and treatment history must be complete.
fn cohort_fields() -> Vec<FieldSpec> {
    vec![
        field("age", "age", VariableKind::Continuous, 0.0, false),
        field("size", "size", VariableKind::Continuous, 0.0, true),
        field("nodes", "nodes", VariableKind::Continuous, 0.0, true),
        field(
            "grade",
            "grade",
            VariableKind::Categorical { levels: 3 },
            1.0,
            true,
        ),
        field("screen", "screen", VariableKind::Binary, 0.0, true),
        field("er", "er", VariableKind::Binary, 0.0, true),
        field("her2", "her2", VariableKind::Binary, 0.0, true),
        field("ki67", "ki67", VariableKind::Binary, 0.0, true),
        field("hormone", "hormone", VariableKind::Binary, 0.0, false),
        field(
            "chemo",
            "chemo",
            VariableKind::Categorical { levels: 3 },
            0.0,
            false,
        ),
        field(
            "trastuzumab",
            "trastuzumab",
            VariableKind::Binary,
            0.0,
            false,
        ),
        field(
            "menopausal",
            "menopausal",
            VariableKind::Categorical { levels: 3 },
            0.0,
            false,
        ),
        field("time", "time", VariableKind::Continuous, 0.0, false),
        field(
            "status",
            "status",
            VariableKind::Categorical { levels: 3 },
            0.0,
            false,
        ),
    ]
}

fn read_frame(path: &Path) -> Result<DataFrame, DataError> {
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;
    Ok(df)
}

fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?;
    let casted = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

fn label_column(df: &DataFrame, name: &str, rows: usize) -> Result<Vec<String>, DataError> {
    if df.get_column_names().iter().all(|c| c.as_str() != name) {
        // Classification columns are optional; absent means unconstrained.
        return Ok(vec![String::new(); rows]);
    }
    let column = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?;
    let casted = column.as_materialized_series().cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or("").trim().to_string())
        .collect())
}

/// Loads the cleaned, merged cohort TSV into a typed table. The `pt` and
/// `pn` columns, when present, become classification labels for the size
/// and node columns respectively.
pub fn load_cohort(path: &Path) -> Result<DataTable, DataError> {
    let df = read_frame(path)?;
    let rows = df.height();
    let fields = cohort_fields();

    let mut values = Array2::zeros((rows, fields.len()));
    for (j, spec) in fields.iter().enumerate() {
        let column = numeric_column(&df, spec.external)?;
        for (i, cell) in column.into_iter().enumerate() {
            let value = match cell {
                None if spec.allow_missing => MISSING,
                None => {
                    return Err(DataError::NullNotAllowed {
                        column: spec.external.to_string(),
                        row: i,
                    });
                }
                Some(v) if !v.is_finite() => {
                    return Err(DataError::NonFinite {
                        column: spec.external.to_string(),
                        row: i,
                        value: v,
                    });
                }
                Some(v) => {
                    let coded = v - spec.offset;
                    if !spec.kind.admits(coded) {
                        return Err(DataError::InvalidCode {
                            column: spec.external.to_string(),
                            row: i,
                            value: v,
                        });
                    }
                    coded
                }
            };
            values[[i, j]] = value;
        }
    }

    let mut class_labels = BTreeMap::new();
    class_labels.insert("size".to_string(), label_column(&df, "pt", rows)?);
    class_labels.insert("nodes".to_string(), label_column(&df, "pn", rows)?);

    let schema = fields
        .iter()
        .map(|spec| ColumnSchema::new(spec.internal, spec.kind))
        .collect();
    log::info!("loaded cohort: {rows} patients, {} variables", fields.len());
    Ok(DataTable::new(schema, values, class_labels)?)
}

fn required(table: &DataTable, row: usize, name: &'static str) -> Result<f64, DataError> {
    let column = table
        .column_index(name)
        .ok_or_else(|| DataError::MissingColumn(name.to_string()))?;
    let value = table.value(row, column);
    if value.is_nan() {
        return Err(DataError::IncompleteRow {
            column: name.to_string(),
            row,
        });
    }
    Ok(value)
}

fn optional(table: &DataTable, row: usize, name: &'static str) -> Result<Option<f64>, DataError> {
    let column = table
        .column_index(name)
        .ok_or_else(|| DataError::MissingColumn(name.to_string()))?;
    let value = table.value(row, column);
    Ok(if value.is_nan() { None } else { Some(value) })
}

/// Projects one (completed) table row onto the scorer's covariate structs.
pub fn covariates_from_row(
    table: &DataTable,
    row: usize,
) -> Result<(PatientCovariates, Treatment), DataError> {
    let patient = PatientCovariates {
        age: required(table, row, "age")?,
        size_mm: required(table, row, "size")?,
        grade: required(table, row, "grade")? as u8 + 1,
        nodes: required(table, row, "nodes")?,
        detection: if required(table, row, "screen")? == 1.0 {
            Detection::Screening
        } else {
            Detection::Symptomatic
        },
        er_positive: required(table, row, "er")? == 1.0,
        her2_positive: optional(table, row, "her2")?.map(|v| v == 1.0),
        ki67_positive: optional(table, row, "ki67")?.map(|v| v == 1.0),
    };
    let treatment = Treatment {
        hormone_therapy: required(table, row, "hormone")? == 1.0,
        chemo: match required(table, row, "chemo")? as u8 {
            1 => ChemoGeneration::Second,
            2 => ChemoGeneration::Third,
            _ => ChemoGeneration::None,
        },
        trastuzumab: required(table, row, "trastuzumab")? == 1.0,
        menopausal: match required(table, row, "menopausal")? as u8 {
            0 => MenopausalStatus::Pre,
            1 => MenopausalStatus::Post,
            _ => MenopausalStatus::Unknown,
        },
    };
    Ok((patient, treatment))
}
