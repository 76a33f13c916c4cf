//! Benchmarks for problem flattening

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mlsvm::{CsrMatrix, ProblemBuilder, SparseVector};

fn synthetic_matrix(rows: usize, cols: usize, nnz_per_row: usize) -> CsrMatrix {
    let sparse_rows: Vec<SparseVector> = (0..rows)
        .map(|i| {
            let indices: Vec<usize> = (0..nnz_per_row).map(|k| (i + k * 7) % cols).collect();
            let values: Vec<f64> = indices.iter().map(|&c| (c as f64 + 1.0) * 0.01).collect();
            SparseVector::new(indices, values)
        })
        .collect();
    CsrMatrix::from_rows(&sparse_rows, cols).expect("valid synthetic rows")
}

fn bench_flatten(c: &mut Criterion) {
    let positive = synthetic_matrix(1000, 64, 12);
    let negative = synthetic_matrix(1000, 64, 12);
    let subset_p: Vec<usize> = (0..1000).step_by(2).collect();
    let subset_n: Vec<usize> = (0..1000).step_by(3).collect();
    let builder = ProblemBuilder::new();

    c.bench_function("whole_matrix_flatten", |b| {
        b.iter(|| {
            builder
                .whole_matrix(black_box(&positive), black_box(&negative))
                .unwrap()
        })
    });

    c.bench_function("index_subset_flatten", |b| {
        b.iter(|| {
            builder
                .index_subset(
                    black_box(&positive),
                    black_box(&negative),
                    black_box(&subset_p),
                    black_box(&subset_n),
                )
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_flatten);
criterion_main!(benches);
