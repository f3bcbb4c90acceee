// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::repro::ReproMode;
use std::borrow::Cow;

/// Diagnostics schema version for decode run metadata.
pub const DIAGNOSTICS_SCHEMA_VERSION: u32 = 1;

/// Outcome of one candidate regularization strength during model selection.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct LambdaScore {
    pub lambda: f64,
    /// In-sample mean squared error; `None` when the fit was unusable.
    pub mse: Option<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub nonzero_coefficients: usize,
}

/// Structured diagnostics captured while a decode runs.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeDiagnostics {
    pub cohort_size: usize,
    pub bit_size: usize,
    pub hash_count: usize,
    pub bin_count: usize,
    pub schema_version: u32,
    pub engine_version: Option<String>,
    pub runtime_ms: Option<u64>,
    pub encoder: Cow<'static, str>,
    pub stages: Vec<String>,
    pub repro_mode: ReproMode,
    pub thread_count: Option<usize>,
    pub lambda_scores: Vec<LambdaScore>,
    pub selected_lambda: Option<f64>,
    pub notes: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for DecodeDiagnostics {
    fn default() -> Self {
        Self {
            cohort_size: 0,
            bit_size: 0,
            hash_count: 0,
            bin_count: 0,
            schema_version: DIAGNOSTICS_SCHEMA_VERSION,
            engine_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            runtime_ms: None,
            encoder: Cow::Borrowed(""),
            stages: vec![],
            repro_mode: ReproMode::Balanced,
            thread_count: None,
            lambda_scores: vec![],
            selected_lambda: None,
            notes: vec![],
            warnings: vec![],
        }
    }
}
