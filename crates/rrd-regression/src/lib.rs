// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod lasso;
pub mod metrics;
pub mod ridge;
mod standardize;

pub use lasso::{LassoFit, fit_lasso};
pub use metrics::mean_squared_error;
pub use ridge::{RidgeFit, fit_ridge};
pub use standardize::predict;

/// Linear regression solvers used by the decoder.
pub fn crate_name() -> &'static str {
    "rrd-regression"
}
