//! Typed patient table with a fixed column schema and an explicit missing
//! sentinel.
//!
//! The schema is established once at construction and never widened: every
//! column has a declared [`VariableKind`], and cell values are validated
//! against it. Missing cells are represented by `f64::NAN`; categorical and
//! binary columns store level indices as whole-valued floats so that the
//! whole table lives in one `Array2<f64>` and can be cloned per replicate.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The missing-value sentinel. Distinguishable from every valid domain value
/// because all validated cell values are finite.
pub const MISSING: f64 = f64::NAN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableKind {
    /// Unbounded real value (tumour size in mm, node count, follow-up years).
    Continuous,
    /// 0/1 indicator.
    Binary,
    /// Level index in `0..levels`.
    Categorical { levels: usize },
}

impl VariableKind {
    /// Whether `value` is a valid non-missing cell for this kind.
    pub fn admits(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match *self {
            VariableKind::Continuous => true,
            VariableKind::Binary => value == 0.0 || value == 1.0,
            VariableKind::Categorical { levels } => {
                value.fract() == 0.0 && value >= 0.0 && (value as usize) < levels
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: VariableKind,
}

impl ColumnSchema {
    pub fn new(name: &str, kind: VariableKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("schema declares {schema} columns but values have {values}")]
    ShapeMismatch { schema: usize, values: usize },
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("class labels for '{variable}' have {labels} rows but the table has {rows}")]
    LabelLength {
        variable: String,
        labels: usize,
        rows: usize,
    },
    #[error("class labels reference unknown column '{0}'")]
    UnknownLabelColumn(String),
    #[error("column '{column}' row {row}: {value} is not a valid value for {kind:?}")]
    InvalidValue {
        column: String,
        row: usize,
        value: f64,
        kind: VariableKind,
    },
}

/// One row per eligible patient, one column per in-scope variable.
///
/// The optional `class_labels` map carries the per-row pathological
/// classification (e.g. pT stage for the size column) used solely for
/// constraint lookup during imputation. An empty label means no
/// classification was recorded for that row.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    schema: Vec<ColumnSchema>,
    values: Array2<f64>,
    class_labels: BTreeMap<String, Vec<String>>,
}

impl DataTable {
    pub fn new(
        schema: Vec<ColumnSchema>,
        values: Array2<f64>,
        class_labels: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, TableError> {
        if schema.len() != values.ncols() {
            return Err(TableError::ShapeMismatch {
                schema: schema.len(),
                values: values.ncols(),
            });
        }
        for (i, col) in schema.iter().enumerate() {
            if schema[..i].iter().any(|c| c.name == col.name) {
                return Err(TableError::DuplicateColumn(col.name.clone()));
            }
        }
        for (variable, labels) in &class_labels {
            if !schema.iter().any(|c| &c.name == variable) {
                return Err(TableError::UnknownLabelColumn(variable.clone()));
            }
            if labels.len() != values.nrows() {
                return Err(TableError::LabelLength {
                    variable: variable.clone(),
                    labels: labels.len(),
                    rows: values.nrows(),
                });
            }
        }
        for (j, col) in schema.iter().enumerate() {
            for (i, &v) in values.column(j).iter().enumerate() {
                if !v.is_nan() && !col.kind.admits(v) {
                    return Err(TableError::InvalidValue {
                        column: col.name.clone(),
                        row: i,
                        value: v,
                        kind: col.kind,
                    });
                }
            }
        }
        Ok(Self {
            schema,
            values,
            class_labels,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn kind(&self, column: usize) -> VariableKind {
        self.schema[column].kind
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|c| c.name == name)
    }

    pub fn column(&self, column: usize) -> ArrayView1<'_, f64> {
        self.values.column(column)
    }

    #[inline]
    pub fn value(&self, row: usize, column: usize) -> f64 {
        self.values[[row, column]]
    }

    /// Overwrites one cell. The engine is the only writer after construction;
    /// it only ever fills cells that were missing in the source table.
    #[inline]
    pub fn set_value(&mut self, row: usize, column: usize, value: f64) {
        self.values[[row, column]] = value;
    }

    #[inline]
    pub fn is_missing(&self, row: usize, column: usize) -> bool {
        self.values[[row, column]].is_nan()
    }

    pub fn missing_count(&self, column: usize) -> usize {
        self.values.column(column).iter().filter(|v| v.is_nan()).count()
    }

    /// Pathological classification label for `variable` at `row`, if one was
    /// recorded. Empty labels are treated as absent.
    pub fn class_label(&self, variable: &str, row: usize) -> Option<&str> {
        self.class_labels
            .get(variable)
            .map(|labels| labels[row].as_str())
            .filter(|label| !label.is_empty())
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("size", VariableKind::Continuous),
            ColumnSchema::new("er", VariableKind::Binary),
            ColumnSchema::new("grade", VariableKind::Categorical { levels: 3 }),
        ]
    }

    #[test]
    fn accepts_missing_and_counts_it() {
        let values = array![[12.0, 1.0, 0.0], [MISSING, 0.0, 2.0], [8.5, MISSING, 1.0]];
        let table = DataTable::new(schema(), values, BTreeMap::new()).unwrap();
        assert_eq!(table.missing_count(0), 1);
        assert_eq!(table.missing_count(1), 1);
        assert_eq!(table.missing_count(2), 0);
        assert!(table.is_missing(1, 0));
        assert!(!table.is_missing(0, 0));
    }

    #[test]
    fn rejects_out_of_domain_values() {
        let values = array![[12.0, 2.0, 0.0]];
        let err = DataTable::new(schema(), values, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TableError::InvalidValue { ref column, .. } if column == "er"));

        let values = array![[12.0, 1.0, 3.0]];
        let err = DataTable::new(schema(), values, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TableError::InvalidValue { ref column, .. } if column == "grade"));
    }

    #[test]
    fn rejects_mismatched_label_length() {
        let values = array![[12.0, 1.0, 0.0], [9.0, 0.0, 1.0]];
        let mut labels = BTreeMap::new();
        labels.insert("size".to_string(), vec!["1C".to_string()]);
        let err = DataTable::new(schema(), values, labels).unwrap_err();
        assert!(matches!(err, TableError::LabelLength { .. }));
    }

    #[test]
    fn empty_label_reads_as_absent() {
        let values = array![[12.0, 1.0, 0.0], [9.0, 0.0, 1.0]];
        let mut labels = BTreeMap::new();
        labels.insert("size".to_string(), vec!["1C".to_string(), String::new()]);
        let table = DataTable::new(schema(), values, labels).unwrap();
        assert_eq!(table.class_label("size", 0), Some("1C"));
        assert_eq!(table.class_label("size", 1), None);
        assert_eq!(table.class_label("er", 0), None);
    }
}
