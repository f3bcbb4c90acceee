// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod aggregation;
pub mod binning;
mod parallel;
pub mod pipeline;
pub mod regression;

pub use aggregation::{AggregationStage, aggregate, count_bits, estimate_expected_true_counts};
pub use binning::{
    BinningStage, CandidateEncoder, Sha256Encoder, build_bins, build_design_matrix,
    design_matrix_from_bins, map_candidate_to_indices,
};
pub use pipeline::{
    DecodeOutcome, Pipeline, ProbabilityEntry, ProbabilityTable, build_context,
    compute_auto_range_upper_bound, decode, decode_with, render_probability_table, run_pipeline,
};
pub use regression::{
    DEFAULT_REFINEMENT_LAMBDA, FinalCountRefinement, ModelSelection, RegressionStage,
    SelectionOptions, coefficient_based_rows, predict_final_class_counts, select_model,
    to_probabilities,
};

/// Randomized-response decode pipeline.
pub fn crate_name() -> &'static str {
    "rrd-decoder"
}
