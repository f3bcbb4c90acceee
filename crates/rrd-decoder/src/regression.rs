// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

#[cfg(feature = "rayon")]
use crate::parallel::can_use_parallel;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use rrd_core::{
    BudgetStatus, DecodeContext, DecodeStage, DenseMatrix, ExecutionContext, LambdaScore,
    LassoSettings, PipelineState, RrdError, validate_lambdas,
};
use rrd_regression::{LassoFit, fit_lasso, fit_ridge, mean_squared_error};
use std::time::Instant;
use tracing::debug;

/// Default L2 penalty of the refinement fit.
pub const DEFAULT_REFINEMENT_LAMBDA: f64 = 1e-3;

/// Solver and execution-control knobs for [`select_model`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionOptions {
    pub lasso: LassoSettings,
    /// Cancellation is polled before every `cancel_check_every`-th fit.
    pub cancel_check_every: usize,
    /// Start of the surrounding run; enables time-budget checks between fits.
    pub started_at: Option<Instant>,
}

/// The minimum-MSE model across all candidate lambdas.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSelection {
    pub lambda: f64,
    pub mse: f64,
    pub fit: LassoFit,
    /// One entry per evaluated lambda, in input order.
    pub scores: Vec<LambdaScore>,
    /// Lambdas left unevaluated after a soft time-budget overrun.
    pub skipped_lambdas: usize,
}

/// Fits one L1 model per lambda on the transposed design (bit positions as
/// observations, bins as features) and keeps the lowest in-sample MSE.
///
/// Ties keep the earlier lambda. Fits that fail numerically or produce a
/// non-finite MSE are recorded as unusable; if none is usable the selection
/// fails with [`RrdError::ModelFitting`].
pub fn select_model(
    design: &DenseMatrix,
    bit_size: usize,
    expected_true_counts: &[f64],
    lambdas: &[f64],
    options: &SelectionOptions,
    exec: &ExecutionContext<'_>,
) -> Result<ModelSelection, RrdError> {
    validate_lambdas(lambdas)?;
    if design.cols() != bit_size {
        return Err(RrdError::dimension_mismatch(format!(
            "design matrix has {} columns, expected bit_size={bit_size}",
            design.cols()
        )));
    }
    if design.rows() == 0 {
        return Err(RrdError::model_fitting(
            "no candidate bins to fit; the design matrix is empty",
        ));
    }
    let features = design.transpose();
    if features.rows() != expected_true_counts.len() {
        return Err(RrdError::dimension_mismatch(format!(
            "feature matrix has {} rows but expected true counts have length {}",
            features.rows(),
            expected_true_counts.len()
        )));
    }

    let mut skipped_lambdas = 0;
    let evaluated = evaluate_lambdas(
        &features,
        expected_true_counts,
        lambdas,
        options,
        exec,
        &mut skipped_lambdas,
    )?;

    let mut scores = Vec::with_capacity(evaluated.len());
    let mut best: Option<(f64, f64, LassoFit)> = None;
    for (score, fit) in evaluated {
        if let (Some(mse), Some(fit)) = (score.mse, fit) {
            let improves = match &best {
                Some((_, best_mse, _)) => mse < *best_mse,
                None => true,
            };
            if improves {
                best = Some((score.lambda, mse, fit));
            }
        }
        scores.push(score);
    }

    let Some((lambda, mse, fit)) = best else {
        return Err(RrdError::model_fitting(format!(
            "no candidate lambda produced a usable model; tried {lambdas:?}"
        )));
    };

    Ok(ModelSelection {
        lambda,
        mse,
        fit,
        scores,
        skipped_lambdas,
    })
}

fn evaluate_lambdas(
    features: &DenseMatrix,
    target: &[f64],
    lambdas: &[f64],
    options: &SelectionOptions,
    exec: &ExecutionContext<'_>,
    skipped: &mut usize,
) -> Result<Vec<(LambdaScore, Option<LassoFit>)>, RrdError> {
    #[cfg(feature = "rayon")]
    if can_use_parallel(exec) {
        return lambdas
            .par_iter()
            .map(|&lambda| score_lambda(features, target, lambda, &options.lasso))
            .collect();
    }

    let mut evaluated = Vec::with_capacity(lambdas.len());
    for (idx, &lambda) in lambdas.iter().enumerate() {
        exec.check_cancelled_every(idx, options.cancel_check_every)?;
        if let Some(started_at) = options.started_at
            && exec.check_time_budget(started_at)? == BudgetStatus::ExceededSoftDegrade
            && !evaluated.is_empty()
        {
            *skipped = lambdas.len() - idx;
            break;
        }
        evaluated.push(score_lambda(features, target, lambda, &options.lasso)?);
    }
    Ok(evaluated)
}

fn score_lambda(
    features: &DenseMatrix,
    target: &[f64],
    lambda: f64,
    lasso: &LassoSettings,
) -> Result<(LambdaScore, Option<LassoFit>), RrdError> {
    let fit = match fit_lasso(features, target, lambda, lasso) {
        Ok(fit) => fit,
        Err(RrdError::NumericalIssue(reason)) => {
            debug!(lambda, %reason, "lambda fit unusable");
            let score = LambdaScore {
                lambda,
                mse: None,
                iterations: 0,
                converged: false,
                nonzero_coefficients: 0,
            };
            return Ok((score, None));
        }
        Err(err) => return Err(err),
    };

    let mse = mean_squared_error(target, &fit.fitted)?;
    debug!(
        lambda,
        mse,
        iterations = fit.iterations,
        converged = fit.converged,
        "lambda scored"
    );
    let usable = mse.is_finite();
    let score = LambdaScore {
        lambda,
        mse: usable.then_some(mse),
        iterations: fit.iterations,
        converged: fit.converged,
        nonzero_coefficients: fit.nonzero_coefficients(),
    };
    Ok((score, usable.then_some(fit)))
}

/// `coefficient / cohort_size` per bin, without clamping or normalization.
pub fn to_probabilities(coefficients: &[f64], cohort_size: usize) -> Result<Vec<f64>, RrdError> {
    if cohort_size == 0 {
        return Err(RrdError::invalid_input(
            "probabilities require a non-empty cohort",
        ));
    }
    let n = cohort_size as f64;
    Ok(coefficients.iter().map(|c| c / n).collect())
}

/// Indices and design rows of the bins whose coefficient is non-negative.
pub fn coefficient_based_rows(
    design: &DenseMatrix,
    coefficients: &[f64],
) -> Result<(Vec<usize>, DenseMatrix), RrdError> {
    if coefficients.len() != design.rows() {
        return Err(RrdError::dimension_mismatch(format!(
            "got {} coefficients for a design matrix with {} bins",
            coefficients.len(),
            design.rows()
        )));
    }
    let kept: Vec<usize> = coefficients
        .iter()
        .enumerate()
        .filter(|(_, c)| **c >= 0.0)
        .map(|(idx, _)| idx)
        .collect();
    let rows = design.select_rows(&kept)?;
    Ok((kept, rows))
}

/// Ridge-refits the de-noised counts on the bins with non-negative
/// coefficients and returns one count per bin (zero for excluded bins).
pub fn predict_final_class_counts(
    design: &DenseMatrix,
    expected_true_counts: &[f64],
    coefficients: &[f64],
    lambda: f64,
) -> Result<Vec<f64>, RrdError> {
    let (kept, rows) = coefficient_based_rows(design, coefficients)?;
    let mut counts = vec![0.0; design.rows()];
    if kept.is_empty() {
        return Ok(counts);
    }

    let features = rows.transpose();
    if features.rows() != expected_true_counts.len() {
        return Err(RrdError::dimension_mismatch(format!(
            "feature matrix has {} rows but expected true counts have length {}",
            features.rows(),
            expected_true_counts.len()
        )));
    }
    let fit = fit_ridge(&features, expected_true_counts, lambda)?;
    for (&bin, value) in kept.iter().zip(fit.coefficients) {
        counts[bin] = value;
    }
    Ok(counts)
}

/// Multi-lambda sparse regression and coefficient-to-probability conversion.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegressionStage;

impl DecodeStage for RegressionStage {
    fn name(&self) -> &'static str {
        "regression"
    }

    fn process<'a>(
        &self,
        mut ctx: DecodeContext<'a>,
        exec: &ExecutionContext<'_>,
    ) -> Result<DecodeContext<'a>, RrdError> {
        ctx.require_state(PipelineState::Binned, self.name())?;
        let options = SelectionOptions {
            lasso: ctx.lasso,
            cancel_check_every: ctx.cancel_check_every,
            started_at: Some(ctx.started_at),
        };
        let selection = select_model(
            &ctx.design_matrix,
            ctx.bit_size(),
            &ctx.expected_true_counts,
            &ctx.lambdas,
            &options,
            exec,
        )?;
        let probabilities = to_probabilities(&selection.fit.coefficients, ctx.cohort_size())?;

        let nonzero = selection.fit.nonzero_coefficients();
        debug!(
            lambda = selection.lambda,
            mse = selection.mse,
            nonzero,
            "model selected"
        );
        exec.record_scalar("selected_lambda", selection.lambda);
        exec.record_scalar("selection_mse", selection.mse);
        exec.record_scalar("nonzero_coefficients", nonzero as f64);

        if !selection.fit.converged {
            ctx.diagnostics.warnings.push(format!(
                "lasso fit for selected lambda={} stopped after {} iterations without converging",
                selection.lambda, selection.fit.iterations
            ));
        }
        if selection.skipped_lambdas > 0 {
            ctx.diagnostics.warnings.push(format!(
                "time budget exceeded; skipped {} of {} candidate lambdas under SoftDegrade",
                selection.skipped_lambdas,
                ctx.lambdas.len()
            ));
        }

        let usable = selection
            .scores
            .iter()
            .filter(|score| score.mse.is_some())
            .count();
        ctx.diagnostics.notes.push(format!(
            "selected lambda={} (mse={:.6}) from {usable} usable of {} candidates; {nonzero} non-zero bins",
            selection.lambda,
            selection.mse,
            ctx.lambdas.len()
        ));
        ctx.diagnostics.lambda_scores = selection.scores;
        ctx.diagnostics.selected_lambda = Some(selection.lambda);
        ctx.selected_lambda = Some(selection.lambda);
        ctx.selection_mse = Some(selection.mse);
        ctx.coefficients = selection.fit.coefficients;
        ctx.probabilities = probabilities;
        ctx.state = PipelineState::Regressed;
        Ok(ctx)
    }
}

/// Optional ridge refit restricted to bins with non-negative coefficients.
#[derive(Clone, Copy, Debug)]
pub struct FinalCountRefinement {
    pub lambda: f64,
}

impl Default for FinalCountRefinement {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_REFINEMENT_LAMBDA,
        }
    }
}

impl DecodeStage for FinalCountRefinement {
    fn name(&self) -> &'static str {
        "final_count_refinement"
    }

    fn process<'a>(
        &self,
        mut ctx: DecodeContext<'a>,
        _exec: &ExecutionContext<'_>,
    ) -> Result<DecodeContext<'a>, RrdError> {
        ctx.require_state(PipelineState::Regressed, self.name())?;
        let counts = predict_final_class_counts(
            &ctx.design_matrix,
            &ctx.expected_true_counts,
            &ctx.coefficients,
            self.lambda,
        )?;
        let kept = ctx.coefficients.iter().filter(|c| **c >= 0.0).count();
        debug!(kept, "final class counts refined");
        ctx.diagnostics.notes.push(format!(
            "ridge refinement (lambda={}) kept {kept} of {} bins",
            self.lambda,
            ctx.coefficients.len()
        ));
        ctx.final_class_counts = Some(counts);
        ctx.state = PipelineState::Refined;
        Ok(ctx)
    }
}
