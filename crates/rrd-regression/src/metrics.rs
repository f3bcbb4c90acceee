// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use rrd_core::RrdError;

/// Mean of squared differences between `truth` and `predicted`.
pub fn mean_squared_error(truth: &[f64], predicted: &[f64]) -> Result<f64, RrdError> {
    if truth.len() != predicted.len() {
        return Err(RrdError::dimension_mismatch(format!(
            "mse requires equal lengths; got truth={}, predicted={}",
            truth.len(),
            predicted.len()
        )));
    }
    if truth.is_empty() {
        return Err(RrdError::invalid_input("mse requires at least one value"));
    }
    let sum = truth
        .iter()
        .zip(predicted.iter())
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>();
    Ok(sum / truth.len() as f64)
}
