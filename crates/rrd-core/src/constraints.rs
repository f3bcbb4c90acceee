// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;

/// Resource limits applied to a single decode run.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Constraints {
    /// Wall-clock budget for the whole pipeline, checked at stage boundaries
    /// and before each candidate fit.
    pub time_budget_ms: Option<u64>,
    /// Upper bound on `bins * bit_size` cells of the design matrix.
    pub max_design_cells: Option<usize>,
}

/// Rejects limits that could never be satisfied.
pub fn validate_constraints(constraints: &Constraints) -> Result<(), RrdError> {
    if constraints.time_budget_ms == Some(0) {
        return Err(RrdError::invalid_input(
            "constraints.time_budget_ms must be >= 1 when set; got 0",
        ));
    }
    if constraints.max_design_cells == Some(0) {
        return Err(RrdError::invalid_input(
            "constraints.max_design_cells must be >= 1 when set; got 0",
        ));
    }
    Ok(())
}
