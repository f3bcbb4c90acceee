// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::aggregation::AggregationStage;
use crate::binning::BinningStage;
use crate::parallel::thread_count;
use crate::regression::RegressionStage;
use rrd_core::{
    BinRange, BudgetStatus, DecodeConfig, DecodeContext, DecodeStage, ExecutionContext,
    ParameterSet, PipelineState, Report, RrdError, validate_constraints, validate_lambdas,
    validate_reports,
};
use std::time::Instant;
use tracing::{debug, info_span, warn};

/// Ordered list of decode stages sharing one [`DecodeStage`] contract.
///
/// A pipeline holds no run state; every call to [`Pipeline::run`] consumes a
/// fresh context and returns it.
pub struct Pipeline {
    stages: Vec<Box<dyn DecodeStage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn DecodeStage>>) -> Self {
        Self { stages }
    }

    /// Aggregation, binning with the default encoder, then regression.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(AggregationStage),
            Box::new(BinningStage::new()),
            Box::new(RegressionStage),
        ])
    }

    pub fn with_stage(mut self, stage: impl DecodeStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Validates the cohort and parameters, then runs every stage in order.
    ///
    /// The first failing check or stage ends the run and its error is
    /// returned unchanged.
    pub fn run<'a>(
        &self,
        mut ctx: DecodeContext<'a>,
        exec: &ExecutionContext<'_>,
    ) -> Result<DecodeContext<'a>, RrdError> {
        let span = info_span!(
            "decode",
            cohort_size = ctx.cohort_size(),
            bit_size = ctx.bit_size(),
            bins = ctx.range.bin_count().unwrap_or(0)
        );
        let _entered = span.enter();
        ctx.started_at = Instant::now();

        preflight(&ctx, exec).inspect_err(|err| {
            warn!(code = err.code(), error = %err, "decode rejected before any stage ran");
        })?;

        ctx.diagnostics.repro_mode = exec.repro_mode;
        ctx.diagnostics.thread_count = thread_count(exec);
        let stage_count = self.stages.len().max(1);
        let mut soft_budget_noted = false;

        for (idx, stage) in self.stages.iter().enumerate() {
            let status = exec
                .check_cancelled()
                .and_then(|()| exec.check_time_budget(ctx.started_at))
                .inspect_err(|err| {
                    warn!(stage = stage.name(), error = %err, "decode stopped before stage");
                })?;
            if status == BudgetStatus::ExceededSoftDegrade && !soft_budget_noted {
                soft_budget_noted = true;
                ctx.diagnostics.warnings.push(format!(
                    "time budget exceeded before stage '{}'; continuing under SoftDegrade",
                    stage.name()
                ));
            }

            ctx = stage.process(ctx, exec).inspect_err(|err| {
                warn!(stage = stage.name(), code = err.code(), error = %err, "decode stage failed");
            })?;
            debug!(stage = stage.name(), state = ctx.state.label(), "stage complete");
            ctx.diagnostics.stages.push(stage.name().to_string());
            exec.report_progress((idx + 1) as f32 / stage_count as f32);
        }

        let runtime_ms = u64::try_from(ctx.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        ctx.diagnostics.runtime_ms = Some(runtime_ms);
        exec.record_scalar("runtime_ms", runtime_ms as f64);
        Ok(ctx)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

fn preflight(ctx: &DecodeContext<'_>, exec: &ExecutionContext<'_>) -> Result<(), RrdError> {
    validate_reports(ctx.reports, ctx.bit_size())?;
    ctx.params.validate()?;
    ctx.range.validate()?;
    validate_lambdas(&ctx.lambdas)?;
    ctx.lasso.validate()?;
    validate_constraints(exec.constraints)?;
    ctx.require_state(PipelineState::Initialized, "pipeline")
}

/// Runs the standard three-stage pipeline.
pub fn run_pipeline<'a>(
    ctx: DecodeContext<'a>,
    exec: &ExecutionContext<'_>,
) -> Result<DecodeContext<'a>, RrdError> {
    Pipeline::standard().run(ctx, exec)
}

/// Largest reported value rounded up to a multiple of `width`; `width`
/// itself when it exceeds every reported value.
pub fn compute_auto_range_upper_bound(reports: &[Report], width: u64) -> Result<u64, RrdError> {
    if width == 0 {
        return Err(RrdError::invalid_input("bin width must be >= 1; got 0"));
    }
    let Some(max) = reports.iter().map(|report| report.value).max() else {
        return Err(RrdError::invalid_input(
            "auto range requires at least one report; got an empty cohort",
        ));
    };
    if width > max {
        return Ok(width);
    }
    max.div_ceil(width).checked_mul(width).ok_or_else(|| {
        RrdError::resource_limit(format!(
            "auto range upper bound overflows for max={max}, width={width}"
        ))
    })
}

/// Builds a fresh context, sizing the upper bound from the reports when the
/// config leaves it unset.
pub fn build_context<'a>(
    reports: &'a [Report],
    params: ParameterSet,
    config: &DecodeConfig,
) -> Result<DecodeContext<'a>, RrdError> {
    config.validate()?;
    let (upper_bound, auto_sized) = match config.bin_upper_bound {
        Some(upper) => (upper, false),
        None => (
            compute_auto_range_upper_bound(reports, config.bin_width)?,
            true,
        ),
    };
    let range = BinRange::new(config.bin_start, config.bin_width, upper_bound)?;
    let mut ctx = DecodeContext::new(reports, params, range, config);
    if auto_sized {
        ctx.diagnostics.notes.push(format!(
            "bin upper bound {upper_bound} sized from the largest reported value"
        ));
    }
    Ok(ctx)
}

/// One rendered row: a bin label and its display probability.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityEntry {
    pub label: String,
    pub start: u64,
    pub end: u64,
    /// Never negative.
    pub probability: f64,
}

/// Bin label to probability, ascending by range start.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbabilityTable {
    pub entries: Vec<ProbabilityEntry>,
}

impl ProbabilityTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| entry.probability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbabilityEntry> {
        self.entries.iter()
    }
}

/// Walks the bins from the range start in `width` steps and clamps negative
/// probabilities to zero; the context keeps the signed values.
pub fn render_probability_table(ctx: &DecodeContext<'_>) -> Result<ProbabilityTable, RrdError> {
    if ctx.state < PipelineState::Regressed {
        return Err(RrdError::invalid_input(format!(
            "probability table requires a regressed context; state is '{}'",
            ctx.state.label()
        )));
    }
    let count = ctx.range.bin_count()?;
    if ctx.probabilities.len() != count {
        return Err(RrdError::dimension_mismatch(format!(
            "{} probabilities for {count} bins",
            ctx.probabilities.len()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for (idx, &probability) in ctx.probabilities.iter().enumerate() {
        let (start, end) = ctx.range.bounds(idx)?;
        entries.push(ProbabilityEntry {
            label: rrd_core::bin_label(start, end),
            start,
            end,
            probability: if probability > 0.0 { probability } else { 0.0 },
        });
    }
    Ok(ProbabilityTable { entries })
}

/// Rendered table plus the final context for callers that need coefficients
/// or diagnostics.
#[derive(Clone, Debug)]
pub struct DecodeOutcome<'a> {
    pub table: ProbabilityTable,
    pub context: DecodeContext<'a>,
}

/// Builds a context and runs `pipeline` over it.
pub fn decode_with<'a>(
    pipeline: &Pipeline,
    reports: &'a [Report],
    params: ParameterSet,
    config: &DecodeConfig,
    exec: &ExecutionContext<'_>,
) -> Result<DecodeOutcome<'a>, RrdError> {
    let ctx = build_context(reports, params, config)?;
    let context = pipeline.run(ctx, exec)?;
    let table = render_probability_table(&context)?;
    Ok(DecodeOutcome { table, context })
}

/// Decodes a cohort with the standard pipeline.
pub fn decode<'a>(
    reports: &'a [Report],
    params: ParameterSet,
    config: &DecodeConfig,
    exec: &ExecutionContext<'_>,
) -> Result<DecodeOutcome<'a>, RrdError> {
    decode_with(&Pipeline::standard(), reports, params, config, exec)
}
