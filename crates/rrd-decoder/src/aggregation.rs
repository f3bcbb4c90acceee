// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

#[cfg(feature = "rayon")]
use crate::parallel::can_use_parallel;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use rrd_core::{
    DecodeContext, DecodeStage, ExecutionContext, ParameterSet, PipelineState, Report, RrdError,
};
use tracing::debug;

const CANCEL_CHECK_REPORTS: usize = 4096;

/// Counts, for each of the `bit_size` positions, how many reports carry a
/// `'1'` there.
pub fn count_bits(
    reports: &[Report],
    bit_size: usize,
    exec: &ExecutionContext<'_>,
) -> Result<Vec<u64>, RrdError> {
    #[cfg(feature = "rayon")]
    if can_use_parallel(exec) {
        return reports
            .par_iter()
            .enumerate()
            .try_fold(
                || vec![0u64; bit_size],
                |mut counts, (idx, report)| {
                    add_report_bits(&mut counts, idx, report)?;
                    Ok::<_, RrdError>(counts)
                },
            )
            .try_reduce(
                || vec![0u64; bit_size],
                |mut lhs, rhs| {
                    for (acc, value) in lhs.iter_mut().zip(rhs) {
                        *acc += value;
                    }
                    Ok(lhs)
                },
            );
    }

    let mut counts = vec![0u64; bit_size];
    for (idx, report) in reports.iter().enumerate() {
        exec.check_cancelled_every(idx, CANCEL_CHECK_REPORTS)?;
        add_report_bits(&mut counts, idx, report)?;
    }
    Ok(counts)
}

fn add_report_bits(counts: &mut [u64], idx: usize, report: &Report) -> Result<(), RrdError> {
    if report.bits.len() != counts.len() {
        return Err(RrdError::invalid_input(format!(
            "report[{idx}] bit string length {} does not match configured bit_size={}",
            report.bits.len(),
            counts.len()
        )));
    }
    for (count, bit) in counts.iter_mut().zip(report.bits.bytes()) {
        if bit == b'1' {
            *count += 1;
        }
    }
    Ok(())
}

/// Inverts the two-stage randomized-response noise per bit position:
/// `(c - offset * n) / ((1 - f) * (q - p))` with `offset = p + f/2 * (q - p)`.
pub fn estimate_expected_true_counts(
    bit_counts: &[u64],
    cohort_size: usize,
    params: &ParameterSet,
) -> Result<Vec<f64>, RrdError> {
    params.check_bias_correction_defined()?;
    if cohort_size == 0 {
        return Err(RrdError::invalid_input(
            "bias correction requires a non-empty cohort",
        ));
    }

    let n = cohort_size as f64;
    let offset = params.noise_offset();
    let scale = params.signal_scale();
    Ok(bit_counts
        .iter()
        .map(|&count| (count as f64 - offset * n) / scale)
        .collect())
}

/// Returns `(bit_counts, expected_true_counts)`, both of length `bit_size`.
pub fn aggregate(
    reports: &[Report],
    params: &ParameterSet,
    exec: &ExecutionContext<'_>,
) -> Result<(Vec<u64>, Vec<f64>), RrdError> {
    params.check_bias_correction_defined()?;
    let bit_counts = count_bits(reports, params.bit_size, exec)?;
    let expected = estimate_expected_true_counts(&bit_counts, reports.len(), params)?;
    Ok((bit_counts, expected))
}

/// Bit counting and bias correction.
#[derive(Clone, Copy, Debug, Default)]
pub struct AggregationStage;

impl DecodeStage for AggregationStage {
    fn name(&self) -> &'static str {
        "aggregation"
    }

    fn process<'a>(
        &self,
        mut ctx: DecodeContext<'a>,
        exec: &ExecutionContext<'_>,
    ) -> Result<DecodeContext<'a>, RrdError> {
        ctx.require_state(PipelineState::Initialized, self.name())?;
        let (bit_counts, expected) = aggregate(ctx.reports, &ctx.params, exec)?;
        debug!(
            cohort_size = ctx.cohort_size(),
            bit_size = ctx.bit_size(),
            max_bit_count = bit_counts.iter().copied().max().unwrap_or(0),
            "bit counts aggregated"
        );
        ctx.bit_counts = bit_counts;
        ctx.expected_true_counts = expected;
        ctx.state = PipelineState::Aggregated;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::{AggregationStage, aggregate, count_bits, estimate_expected_true_counts};
    use rrd_core::{
        BinRange, Constraints, DecodeConfig, DecodeContext, DecodeStage, ExecutionContext,
        ParameterSet, PipelineState, Report, ReproMode, RrdError,
    };

    fn params16() -> ParameterSet {
        ParameterSet {
            bit_size: 16,
            ..ParameterSet::default()
        }
    }

    fn uniform_cohort() -> Vec<Report> {
        (0..10)
            .map(|i| Report::new("0101010000100111", 100 * i))
            .collect()
    }

    #[test]
    fn counts_bits_for_uniform_cohort() {
        let constraints = Constraints::default();
        let exec = ExecutionContext::new(&constraints);
        let counts = count_bits(&uniform_cohort(), 16, &exec).expect("valid cohort");
        assert_eq!(
            counts,
            vec![0, 10, 0, 10, 0, 10, 0, 0, 0, 0, 10, 0, 0, 10, 10, 10]
        );
    }

    #[test]
    fn strict_mode_counts_match_parallel_counts() {
        let constraints = Constraints::default();
        let reports: Vec<Report> = (0..500u64)
            .map(|i| {
                let bits: String = (0..16)
                    .map(|b| if (i * 7 + b) % 3 == 0 { '1' } else { '0' })
                    .collect();
                Report::new(bits, i)
            })
            .collect();
        let strict = ExecutionContext::new(&constraints).with_repro_mode(ReproMode::Strict);
        let fast = ExecutionContext::new(&constraints).with_repro_mode(ReproMode::Fast);
        assert_eq!(
            count_bits(&reports, 16, &strict).expect("strict count"),
            count_bits(&reports, 16, &fast).expect("fast count")
        );
    }

    #[test]
    fn bias_correction_follows_closed_form() {
        let counts = [0, 10, 0, 10, 0, 10, 0, 0, 0, 0, 10, 0, 0, 10, 10, 10];
        let expected =
            estimate_expected_true_counts(&counts, 10, &params16()).expect("q != p");
        assert_eq!(expected.len(), 16);
        // offset = 0.5625, scale = 0.125
        assert_eq!(expected[0], -45.0);
        assert_eq!(expected[1], 35.0);
    }

    #[test]
    fn equal_instantaneous_probabilities_are_division_undefined() {
        let params = ParameterSet {
            instantaneous_probability_for_one: 0.5,
            ..params16()
        };
        let err = estimate_expected_true_counts(&[1, 2], 2, &params)
            .expect_err("q == p has no inverse");
        assert!(matches!(err, RrdError::DivisionUndefined(_)));

        let constraints = Constraints::default();
        let exec = ExecutionContext::new(&constraints);
        assert!(matches!(
            aggregate(&uniform_cohort(), &params, &exec),
            Err(RrdError::DivisionUndefined(_))
        ));
    }

    #[test]
    fn mismatched_bit_length_is_rejected() {
        let constraints = Constraints::default();
        let exec = ExecutionContext::new(&constraints).with_repro_mode(ReproMode::Strict);
        let reports = vec![Report::new("0101", 1), Report::new("01", 2)];
        let err = count_bits(&reports, 4, &exec).expect_err("second report is short");
        assert!(matches!(err, RrdError::InvalidInput(ref msg) if msg.contains("report[1]")));
    }

    #[test]
    fn stage_fills_counts_and_advances_state() {
        let reports = uniform_cohort();
        let range = BinRange::new(0, 100, 1000).expect("valid range");
        let ctx = DecodeContext::new(&reports, params16(), range, &DecodeConfig::default());
        let constraints = Constraints::default();
        let exec = ExecutionContext::new(&constraints);

        let ctx = AggregationStage.process(ctx, &exec).expect("aggregation succeeds");
        assert_eq!(ctx.state, PipelineState::Aggregated);
        assert_eq!(ctx.bit_counts.len(), 16);
        assert_eq!(ctx.expected_true_counts.len(), 16);

        let err = AggregationStage
            .process(ctx, &exec)
            .expect_err("aggregating twice is out of order");
        assert!(matches!(err, RrdError::InvalidInput(_)));
    }
}
