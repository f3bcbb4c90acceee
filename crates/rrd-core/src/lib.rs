// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod config;
pub mod constraints;
pub mod context;
pub mod control;
pub mod diagnostics;
pub mod error;
pub mod execution_context;
pub mod matrix;
pub mod observability;
pub mod params;
pub mod report;
pub mod repro;
#[cfg(feature = "serde")]
pub mod schema_migration;
pub mod stage;

pub use config::{
    BinRange, DEFAULT_BIN_START, DEFAULT_BIN_WIDTH, DEFAULT_LAMBDAS, DecodeConfig, LassoSettings,
    MAX_BIN_COUNT, validate_lambdas,
};
pub use constraints::{Constraints, validate_constraints};
pub use context::{Bin, DecodeContext, PipelineState, bin_label};
pub use control::{BudgetMode, BudgetStatus, CancelToken};
pub use diagnostics::{DIAGNOSTICS_SCHEMA_VERSION, DecodeDiagnostics, LambdaScore};
pub use error::RrdError;
pub use execution_context::ExecutionContext;
pub use matrix::DenseMatrix;
pub use observability::{ProgressSink, TelemetrySink};
pub use params::ParameterSet;
pub use report::{Report, validate_reports};
pub use repro::ReproMode;
#[cfg(feature = "serde")]
pub use schema_migration::{
    CURRENT_SCHEMA_VERSION, DecodeConfigWire, MAX_FORWARD_COMPAT_SCHEMA_VERSION,
    ParameterSetWire, UnknownFields, validate_schema_version,
};
pub use stage::DecodeStage;

/// Core shared types and traits for randomized-response decoding.
pub fn crate_name() -> &'static str {
    "rrd-core"
}
