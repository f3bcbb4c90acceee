// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use rrd_core::{DenseMatrix, RrdError};

/// Scales below this are treated as constant columns.
pub(crate) const MIN_COLUMN_SCALE: f64 = 1e-12;

/// Feature columns centered and scaled to unit (population) variance, plus
/// the centered target.
#[derive(Clone, Debug)]
pub(crate) struct Standardized {
    pub columns: Vec<Vec<f64>>,
    pub means: Vec<f64>,
    /// `None` marks a constant column whose coefficient is pinned to zero.
    pub scales: Vec<Option<f64>>,
    pub target: Vec<f64>,
    pub target_mean: f64,
}

pub(crate) fn standardize(x: &DenseMatrix, y: &[f64]) -> Result<Standardized, RrdError> {
    let n = x.rows();
    if n == 0 {
        return Err(RrdError::invalid_input(
            "regression requires at least one observation",
        ));
    }
    if y.len() != n {
        return Err(RrdError::dimension_mismatch(format!(
            "feature matrix has {n} rows but target has length {}",
            y.len()
        )));
    }
    if let Some(idx) = y.iter().position(|v| !v.is_finite()) {
        return Err(RrdError::numerical_issue(format!(
            "target[{idx}] is not finite"
        )));
    }

    let n_f = n as f64;
    let target_mean = y.iter().sum::<f64>() / n_f;
    let target = y.iter().map(|v| v - target_mean).collect();

    let mut columns = Vec::with_capacity(x.cols());
    let mut means = Vec::with_capacity(x.cols());
    let mut scales = Vec::with_capacity(x.cols());
    for j in 0..x.cols() {
        let mut column = x.column(j);
        if let Some(idx) = column.iter().position(|v| !v.is_finite()) {
            return Err(RrdError::numerical_issue(format!(
                "feature matrix entry ({idx}, {j}) is not finite"
            )));
        }
        let mean = column.iter().sum::<f64>() / n_f;
        for value in &mut column {
            *value -= mean;
        }
        let scale = (column.iter().map(|v| v * v).sum::<f64>() / n_f).sqrt();
        if scale > MIN_COLUMN_SCALE {
            for value in &mut column {
                *value /= scale;
            }
            scales.push(Some(scale));
        } else {
            column.iter_mut().for_each(|v| *v = 0.0);
            scales.push(None);
        }
        means.push(mean);
        columns.push(column);
    }

    Ok(Standardized {
        columns,
        means,
        scales,
        target,
        target_mean,
    })
}

impl Standardized {
    /// Maps standardized coefficients back to the original feature scale and
    /// returns `(coefficients, intercept)`.
    pub(crate) fn unscale(&self, beta: &[f64]) -> (Vec<f64>, f64) {
        let coefficients: Vec<f64> = beta
            .iter()
            .zip(self.scales.iter())
            .map(|(b, scale)| scale.map_or(0.0, |s| b / s))
            .collect();
        let intercept = self.target_mean
            - coefficients
                .iter()
                .zip(self.means.iter())
                .map(|(w, m)| w * m)
                .sum::<f64>();
        (coefficients, intercept)
    }
}

/// `intercept + x * coefficients` for every row of `x`.
pub fn predict(x: &DenseMatrix, coefficients: &[f64], intercept: f64) -> Vec<f64> {
    x.iter_rows()
        .map(|row| {
            intercept
                + row
                    .iter()
                    .zip(coefficients.iter())
                    .map(|(a, w)| a * w)
                    .sum::<f64>()
        })
        .collect()
}
