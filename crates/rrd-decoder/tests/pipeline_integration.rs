// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use rrd_core::{
    BudgetMode, Constraints, DecodeConfig, ExecutionContext, ParameterSet, PipelineState, Report,
    ReproMode, RrdError,
};
use rrd_decoder::{
    CandidateEncoder, FinalCountRefinement, Pipeline, Sha256Encoder, decode, decode_with,
};

fn lcg_next(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state
}

fn uniform(state: &mut u64) -> f64 {
    (lcg_next(state) >> 11) as f64 / (1u64 << 53) as f64
}

/// 70% of clients fall into 0-100, the rest into 300-400.
fn true_value(client: u64) -> u64 {
    if client % 10 < 7 {
        (client * 37) % 100
    } else {
        300 + (client * 13) % 100
    }
}

/// Client-side RAPPOR encoding: Bloom filter of the value's bin, permanent
/// randomization, then instantaneous randomization.
fn encode_client(value: u64, params: &ParameterSet, state: &mut u64) -> String {
    let start = value / 100 * 100;
    let label = format!("{start}-{}", start + 100);
    let indices = Sha256Encoder.bloom_indices(&label, params.bit_size, params.hash_count);
    let f = params.permanent_probability;

    (0..params.bit_size)
        .map(|bit| {
            let true_bit = indices.contains(&bit);
            let u = uniform(state);
            let permanent = if u < f / 2.0 {
                true
            } else if u < f {
                false
            } else {
                true_bit
            };
            let v = uniform(state);
            let reported = if permanent {
                v < params.instantaneous_probability_for_one
            } else {
                v < params.instantaneous_probability_for_zero
            };
            if reported { '1' } else { '0' }
        })
        .collect()
}

fn synthetic_cohort(n: u64, params: &ParameterSet, seed: u64) -> Vec<Report> {
    let mut state = seed;
    (0..n)
        .map(|client| {
            let value = true_value(client);
            Report::new(encode_client(value, params, &mut state), value)
        })
        .collect()
}

fn mild_params() -> ParameterSet {
    ParameterSet::new(32, 2, 0.2, 0.25, 0.75).expect("valid parameters")
}

#[test]
fn decode_recovers_planted_distribution() {
    let params = mild_params();
    let config = DecodeConfig {
        bin_upper_bound: Some(1000),
        ..DecodeConfig::default()
    };
    let constraints = Constraints::default();
    let exec = ExecutionContext::new(&constraints);

    for seed in [7, 42, 2024] {
        let reports = synthetic_cohort(5000, &params, seed);
        let outcome = decode(&reports, params.clone(), &config, &exec).expect("decode succeeds");

        assert_eq!(outcome.table.len(), 10);
        let dominant = outcome.table.get("0-100").expect("first bin rendered");
        let secondary = outcome.table.get("300-400").expect("fourth bin rendered");
        assert!((0.6..=0.8).contains(&dominant), "seed={seed}: 0-100 -> {dominant}");
        assert!((0.2..=0.4).contains(&secondary), "seed={seed}: 300-400 -> {secondary}");
        for entry in outcome.table.iter() {
            if entry.label != "0-100" && entry.label != "300-400" {
                assert!(
                    entry.probability < 0.1,
                    "seed={seed}: {} -> {}",
                    entry.label,
                    entry.probability
                );
            }
        }

        let ctx = &outcome.context;
        assert_eq!(ctx.state, PipelineState::Regressed);
        assert_eq!(ctx.diagnostics.lambda_scores.len(), 5);
        assert_eq!(ctx.selected_lambda, Some(0.01));
        assert_eq!(ctx.coefficients.len(), 10);
    }
}

#[test]
fn auto_sized_range_covers_largest_value() {
    let params = mild_params();
    let reports = synthetic_cohort(2000, &params, 11);
    let constraints = Constraints::default();
    let exec = ExecutionContext::new(&constraints);

    let outcome =
        decode(&reports, params, &DecodeConfig::default(), &exec).expect("decode succeeds");
    assert_eq!(outcome.context.range.upper_bound, 400);
    let labels: Vec<&str> = outcome
        .table
        .iter()
        .map(|entry| entry.label.as_str())
        .collect();
    assert_eq!(labels, vec!["0-100", "100-200", "200-300", "300-400"]);
}

#[test]
fn strict_and_parallel_runs_agree() {
    let params = mild_params();
    let reports = synthetic_cohort(3000, &params, 99);
    let config = DecodeConfig {
        bin_upper_bound: Some(1000),
        ..DecodeConfig::default()
    };
    let constraints = Constraints::default();

    let strict = ExecutionContext::new(&constraints).with_repro_mode(ReproMode::Strict);
    let fast = ExecutionContext::new(&constraints).with_repro_mode(ReproMode::Fast);
    let lhs = decode(&reports, params.clone(), &config, &strict).expect("strict decode");
    let rhs = decode(&reports, params, &config, &fast).expect("fast decode");

    assert_eq!(lhs.table, rhs.table);
    assert_eq!(lhs.context.coefficients, rhs.context.coefficients);
    assert_eq!(
        lhs.context.diagnostics.lambda_scores,
        rhs.context.diagnostics.lambda_scores
    );
}

#[test]
fn refinement_stage_is_opt_in() {
    let params = mild_params();
    let reports = synthetic_cohort(2000, &params, 5);
    let config = DecodeConfig {
        bin_upper_bound: Some(1000),
        ..DecodeConfig::default()
    };
    let constraints = Constraints::default();
    let exec = ExecutionContext::new(&constraints);

    let standard = decode(&reports, params.clone(), &config, &exec).expect("standard decode");
    assert!(standard.context.final_class_counts.is_none());

    let pipeline = Pipeline::standard().with_stage(FinalCountRefinement::default());
    let refined =
        decode_with(&pipeline, &reports, params, &config, &exec).expect("refined decode");
    let counts = refined
        .context
        .final_class_counts
        .as_ref()
        .expect("refinement stores final class counts");
    assert_eq!(counts.len(), 10);
    for (count, coefficient) in counts.iter().zip(&refined.context.coefficients) {
        if *coefficient < 0.0 {
            assert_eq!(*count, 0.0);
        }
    }
    assert_eq!(refined.table, standard.table);
}

#[test]
fn soft_time_budget_still_returns_a_table() {
    let params = mild_params();
    let reports = synthetic_cohort(500, &params, 3);
    let constraints = Constraints {
        time_budget_ms: Some(1),
        ..Constraints::default()
    };
    let exec = ExecutionContext::new(&constraints).with_budget_mode(BudgetMode::SoftDegrade);

    let outcome =
        decode(&reports, params, &DecodeConfig::default(), &exec).expect("soft budget never fails");
    assert_eq!(outcome.table.len(), 4);
    assert!(!outcome.context.diagnostics.lambda_scores.is_empty());
}

#[test]
fn errors_distinguish_invalid_cohorts_from_undefined_parameters() {
    let constraints = Constraints::default();
    let exec = ExecutionContext::new(&constraints);
    let config = DecodeConfig {
        bin_upper_bound: Some(1000),
        ..DecodeConfig::default()
    };

    let err = decode(&[], mild_params(), &config, &exec).expect_err("empty cohort");
    assert!(matches!(err, RrdError::InvalidInput(_)));

    let reports = synthetic_cohort(10, &mild_params(), 1);
    let degenerate = ParameterSet {
        instantaneous_probability_for_one: 0.25,
        ..mild_params()
    };
    let err = decode(&reports, degenerate, &config, &exec).expect_err("q == p");
    assert!(matches!(err, RrdError::DivisionUndefined(_)));
    assert_eq!(err.code(), "division_undefined");
}

#[test]
fn outlier_value_is_a_resource_limit_not_an_allocation_abort() {
    let params = mild_params();
    let mut reports = synthetic_cohort(10, &params, 17);
    let outlier_bits = reports[0].bits.clone();
    reports.push(Report::new(outlier_bits, 1_000_000_000_000));
    let constraints = Constraints::default();
    let exec = ExecutionContext::new(&constraints).with_repro_mode(ReproMode::Strict);

    let err = decode(&reports, params, &DecodeConfig::default(), &exec)
        .expect_err("10^10 auto-sized bins exceed the bin ceiling");
    assert!(matches!(err, RrdError::ResourceLimit(_)));
    assert_eq!(err.code(), "resource_limit");
}
