// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::standardize::{predict, standardize};
use rrd_core::{DenseMatrix, RrdError};

/// Result of a ridge (L2-regularized) fit.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RidgeFit {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub fitted: Vec<f64>,
}

/// Fits `y ~ b + x w` minimizing `||y - b - x w||^2 + lambda * ||w||^2` over
/// standardized columns, solving the normal equations by Cholesky.
pub fn fit_ridge(x: &DenseMatrix, y: &[f64], lambda: f64) -> Result<RidgeFit, RrdError> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(RrdError::invalid_input(format!(
            "ridge lambda must be finite and >= 0; got {lambda}"
        )));
    }
    let data = standardize(x, y)?;

    let active: Vec<usize> = (0..data.columns.len())
        .filter(|&j| data.scales[j].is_some())
        .collect();
    let m = active.len();

    let mut gram = vec![0.0; m * m];
    let mut rhs = vec![0.0; m];
    for (a, &ja) in active.iter().enumerate() {
        let col_a = &data.columns[ja];
        rhs[a] = dot(col_a, &data.target);
        for (b, &jb) in active.iter().enumerate().take(a + 1) {
            let value = dot(col_a, &data.columns[jb]);
            gram[a * m + b] = value;
            gram[b * m + a] = value;
        }
        gram[a * m + a] += lambda;
    }

    cholesky_in_place(&mut gram, m)?;
    let solved = cholesky_solve(&gram, &rhs, m);

    let mut beta = vec![0.0; data.columns.len()];
    for (a, &j) in active.iter().enumerate() {
        beta[j] = solved[a];
    }
    let (coefficients, intercept) = data.unscale(&beta);
    if coefficients.iter().any(|w| !w.is_finite()) || !intercept.is_finite() {
        return Err(RrdError::numerical_issue(
            "non-finite ridge coefficients",
        ));
    }
    let fitted = predict(x, &coefficients, intercept);

    Ok(RidgeFit {
        coefficients,
        intercept,
        fitted,
    })
}

fn dot(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter().zip(rhs.iter()).map(|(a, b)| a * b).sum()
}

/// Lower-triangular Cholesky factor written over `matrix` (row-major `n x n`).
fn cholesky_in_place(matrix: &mut [f64], n: usize) -> Result<(), RrdError> {
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[i * n + j];
            for k in 0..j {
                sum -= matrix[i * n + k] * matrix[j * n + k];
            }

            if i == j {
                if !sum.is_finite() || sum <= 0.0 {
                    return Err(RrdError::numerical_issue(
                        "ridge normal equations are not positive definite",
                    ));
                }
                matrix[i * n + i] = sum.sqrt();
            } else {
                matrix[i * n + j] = sum / matrix[j * n + j];
            }
        }

        for j in i + 1..n {
            matrix[i * n + j] = 0.0;
        }
    }
    Ok(())
}

fn cholesky_solve(factor: &[f64], rhs: &[f64], n: usize) -> Vec<f64> {
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= factor[i * n + k] * z[k];
        }
        z[i] = sum / factor[i * n + i];
    }

    let mut solution = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in i + 1..n {
            sum -= factor[k * n + i] * solution[k];
        }
        solution[i] = sum / factor[i * n + i];
    }
    solution
}
