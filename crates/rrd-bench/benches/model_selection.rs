// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rrd_core::{
    BinRange, Constraints, DEFAULT_LAMBDAS, DenseMatrix, ExecutionContext, ReproMode,
};
use rrd_decoder::{SelectionOptions, Sha256Encoder, build_design_matrix, select_model};

/// De-noised counts produced exactly by a planted two-bin population.
fn planted_counts(design: &DenseMatrix, planted: &[(usize, f64)]) -> Vec<f64> {
    let mut counts = vec![0.0; design.cols()];
    for &(row, clients) in planted {
        for (count, &bit) in counts.iter_mut().zip(design.row(row)) {
            *count += bit * clients;
        }
    }
    counts
}

fn bench_selection_case(c: &mut Criterion, upper_bound: u64, bit_size: usize) {
    let range = BinRange::new(0, 100, upper_bound).expect("benchmark range should be valid");
    let constraints = Constraints::default();
    let setup = ExecutionContext::new(&constraints);
    let (_, design) = build_design_matrix(&range, bit_size, 2, &Sha256Encoder, &setup)
        .expect("benchmark design should build");
    let expected = planted_counts(&design, &[(0, 3_500.0), (3, 1_500.0)]);
    let options = SelectionOptions::default();

    for repro_mode in [ReproMode::Strict, ReproMode::Balanced] {
        let exec = ExecutionContext::new(&constraints).with_repro_mode(repro_mode);
        c.bench_function(
            &format!(
                "select_model_bins{}_k{bit_size}_{}",
                design.rows(),
                repro_mode.label()
            ),
            |b| {
                b.iter(|| {
                    select_model(
                        black_box(&design),
                        bit_size,
                        black_box(&expected),
                        &DEFAULT_LAMBDAS,
                        &options,
                        black_box(&exec),
                    )
                    .expect("model selection benchmark should succeed");
                })
            },
        );
    }
}

fn benchmark_selection_k32(c: &mut Criterion) {
    bench_selection_case(c, 1_000, 32);
}

fn benchmark_selection_k128(c: &mut Criterion) {
    bench_selection_case(c, 5_000, 128);
}

criterion_group!(benches, benchmark_selection_k32, benchmark_selection_k128);
criterion_main!(benches);
