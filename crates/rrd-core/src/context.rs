// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;
use crate::config::{BinRange, DecodeConfig, LassoSettings};
use crate::diagnostics::DecodeDiagnostics;
use crate::matrix::DenseMatrix;
use crate::params::ParameterSet;
use crate::report::Report;
use std::time::Instant;

/// Progress of a decode context through the pipeline.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    #[default]
    Initialized,
    Aggregated,
    Binned,
    Regressed,
    Refined,
}

impl PipelineState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Aggregated => "aggregated",
            Self::Binned => "binned",
            Self::Regressed => "regressed",
            Self::Refined => "refined",
        }
    }
}

/// One candidate range and the Bloom-filter positions its label hashes to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bin {
    /// `"<start>-<end>"`.
    pub label: String,
    pub start: u64,
    pub end: u64,
    pub indices: Vec<usize>,
}

impl Bin {
    pub fn new(start: u64, end: u64, indices: Vec<usize>) -> Self {
        Self {
            label: bin_label(start, end),
            start,
            end,
            indices,
        }
    }
}

pub fn bin_label(start: u64, end: u64) -> String {
    format!("{start}-{end}")
}

/// Per-run decode state, built fresh for every invocation and moved through
/// the stages by value.
///
/// Reports are borrowed and never mutated. Each stage fills in the fields it
/// owns and advances [`DecodeContext::state`].
#[derive(Clone, Debug)]
pub struct DecodeContext<'a> {
    pub reports: &'a [Report],
    pub params: ParameterSet,
    pub range: BinRange,
    pub lambdas: Vec<f64>,
    pub lasso: LassoSettings,
    pub cancel_check_every: usize,
    /// Wall-clock start of the run; reset when a pipeline starts running.
    pub started_at: Instant,
    pub state: PipelineState,
    /// Candidate bins in ascending range order; row order of `design_matrix`.
    pub bins: Vec<Bin>,
    /// `bins x bit_size` 0/1 matrix.
    pub design_matrix: DenseMatrix,
    pub bit_counts: Vec<u64>,
    pub expected_true_counts: Vec<f64>,
    pub selected_lambda: Option<f64>,
    pub selection_mse: Option<f64>,
    /// Signed per-bin coefficients of the selected model.
    pub coefficients: Vec<f64>,
    /// `coefficients / cohort_size`, unclamped.
    pub probabilities: Vec<f64>,
    /// Per-bin counts from the optional refinement stage.
    pub final_class_counts: Option<Vec<f64>>,
    pub diagnostics: DecodeDiagnostics,
}

impl<'a> DecodeContext<'a> {
    pub fn new(
        reports: &'a [Report],
        params: ParameterSet,
        range: BinRange,
        config: &DecodeConfig,
    ) -> Self {
        let diagnostics = DecodeDiagnostics {
            cohort_size: reports.len(),
            bit_size: params.bit_size,
            hash_count: params.hash_count,
            ..DecodeDiagnostics::default()
        };
        Self {
            reports,
            params,
            range,
            lambdas: config.lambdas.clone(),
            lasso: config.lasso,
            cancel_check_every: config.cancel_check_every,
            started_at: Instant::now(),
            state: PipelineState::Initialized,
            bins: vec![],
            design_matrix: DenseMatrix::default(),
            bit_counts: vec![],
            expected_true_counts: vec![],
            selected_lambda: None,
            selection_mse: None,
            coefficients: vec![],
            probabilities: vec![],
            final_class_counts: None,
            diagnostics,
        }
    }

    pub fn bit_size(&self) -> usize {
        self.params.bit_size
    }

    pub fn cohort_size(&self) -> usize {
        self.reports.len()
    }

    /// Fails unless the context is exactly in `expected`.
    pub fn require_state(&self, expected: PipelineState, stage: &str) -> Result<(), RrdError> {
        if self.state == expected {
            return Ok(());
        }
        Err(RrdError::invalid_input(format!(
            "stage '{stage}' requires state '{}', context is '{}'",
            expected.label(),
            self.state.label()
        )))
    }
}
