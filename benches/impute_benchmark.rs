use criterion::{Criterion, black_box, criterion_group, criterion_main};
use mipredict::config::{ConditionalModelSpec, ImputationConfig, PredictorMask};
use mipredict::impute::{ImputationEngine, constraint};
use mipredict::table::{ColumnSchema, DataTable, MISSING, VariableKind};
use ndarray::Array2;
use std::collections::BTreeMap;

fn cohort(n: usize) -> DataTable {
    let schema = vec![
        ColumnSchema::new("age", VariableKind::Continuous),
        ColumnSchema::new("size", VariableKind::Continuous),
        ColumnSchema::new("nodes", VariableKind::Continuous),
        ColumnSchema::new("er", VariableKind::Binary),
    ];
    let mut values = Array2::zeros((n, schema.len()));
    let mut pt = Vec::with_capacity(n);
    for i in 0..n {
        values[[i, 0]] = 40.0 + (i % 35) as f64;
        values[[i, 1]] = if i % 6 == 1 { MISSING } else { 8.0 + (i % 40) as f64 };
        values[[i, 2]] = (i % 5) as f64;
        values[[i, 3]] = if i % 9 == 4 {
            MISSING
        } else if i % 4 == 0 {
            0.0
        } else {
            1.0
        };
        pt.push(if 8.0 + (i % 40) as f64 <= 20.0 { "1C" } else { "2" }.to_string());
    }
    let mut labels = BTreeMap::new();
    labels.insert("size".to_string(), pt);
    DataTable::new(schema, values, labels).unwrap()
}

fn bench_engine(c: &mut Criterion) {
    let table = cohort(200);
    let config = ImputationConfig {
        replicates: 2,
        iterations: 5,
        seed: 42,
        models: vec![
            (
                "size".to_string(),
                ConditionalModelSpec::PredictiveMeanMatching { donors: 5 },
            ),
            ("er".to_string(), ConditionalModelSpec::BinaryLogistic),
        ],
        mask: PredictorMask::all(table.n_cols()),
    };
    let constraints = constraint::clinical_defaults();
    let engine = ImputationEngine::new(&config, &constraints);

    c.bench_function("impute_200x2", |b| {
        b.iter(|| black_box(engine.run(&table).unwrap()))
    });
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
