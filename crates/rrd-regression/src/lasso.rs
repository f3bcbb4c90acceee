// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::standardize::{predict, standardize};
use rrd_core::{DenseMatrix, LassoSettings, RrdError};

/// Result of one L1-regularized fit.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct LassoFit {
    /// One coefficient per feature column, on the original feature scale.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub fitted: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl LassoFit {
    pub fn nonzero_coefficients(&self) -> usize {
        self.coefficients.iter().filter(|w| **w != 0.0).count()
    }
}

/// Fits `y ~ b + x w` minimizing `||y - b - x w||^2 + lambda * ||w||_1` by
/// cyclic coordinate descent.
///
/// Columns are standardized before fitting and the penalty applies to the
/// standardized coefficients; constant columns get a zero coefficient.
/// Running out of iterations is not an error: the last iterate is returned
/// with `converged = false`.
pub fn fit_lasso(
    x: &DenseMatrix,
    y: &[f64],
    lambda: f64,
    settings: &LassoSettings,
) -> Result<LassoFit, RrdError> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(RrdError::invalid_input(format!(
            "lambda must be finite and >= 0; got {lambda}"
        )));
    }
    settings.validate()?;
    let data = standardize(x, y)?;

    let n_f = y.len() as f64;
    let p = data.columns.len();
    let threshold = lambda / 2.0;
    let target_scale = (data.target.iter().map(|v| v * v).sum::<f64>() / n_f).sqrt();
    let stop_at = settings.tolerance * target_scale.max(f64::EPSILON);

    let mut beta = vec![0.0; p];
    let mut residual = data.target.clone();
    let mut iterations = 0;
    let mut converged = p == 0;

    while !converged && iterations < settings.max_iterations {
        iterations += 1;
        let mut max_delta = 0.0_f64;
        for j in 0..p {
            if data.scales[j].is_none() {
                continue;
            }
            let column = &data.columns[j];
            let old = beta[j];
            // Standardized columns have squared norm n.
            let rho = column
                .iter()
                .zip(residual.iter())
                .map(|(u, r)| u * r)
                .sum::<f64>()
                + n_f * old;
            let new = soft_threshold(rho, threshold) / n_f;
            let delta = new - old;
            if delta != 0.0 {
                for (r, u) in residual.iter_mut().zip(column.iter()) {
                    *r -= u * delta;
                }
                beta[j] = new;
                max_delta = max_delta.max(delta.abs());
            }
        }
        if !max_delta.is_finite() {
            return Err(RrdError::numerical_issue(format!(
                "coordinate descent diverged at iteration {iterations} for lambda={lambda}"
            )));
        }
        converged = max_delta <= stop_at;
    }

    let (coefficients, intercept) = data.unscale(&beta);
    if coefficients.iter().any(|w| !w.is_finite()) || !intercept.is_finite() {
        return Err(RrdError::numerical_issue(format!(
            "non-finite coefficients for lambda={lambda}"
        )));
    }
    let fitted = predict(x, &coefficients, intercept);

    Ok(LassoFit {
        coefficients,
        intercept,
        fitted,
        iterations,
        converged,
    })
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{fit_lasso, soft_threshold};
    use crate::metrics::mean_squared_error;
    use rrd_core::{DenseMatrix, LassoSettings, RrdError};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual} (tol={tol})"
        );
    }

    fn tight() -> LassoSettings {
        LassoSettings {
            max_iterations: 10_000,
            tolerance: 1e-10,
        }
    }

    #[test]
    fn soft_threshold_shrinks_towards_zero() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }

    #[test]
    fn zero_lambda_recovers_exact_linear_relation() {
        let x = DenseMatrix::from_rows(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![2.0, 1.0],
            vec![0.0, 3.0],
        ])
        .expect("rows");
        let y: Vec<f64> = x
            .iter_rows()
            .map(|row| 1.5 + 2.0 * row[0] - 3.0 * row[1])
            .collect();

        let fit = fit_lasso(&x, &y, 0.0, &tight()).expect("well-posed fit");
        assert!(fit.converged);
        assert_close(fit.coefficients[0], 2.0, 1e-6);
        assert_close(fit.coefficients[1], -3.0, 1e-6);
        assert_close(fit.intercept, 1.5, 1e-6);
        assert!(mean_squared_error(&y, &fit.fitted).expect("same length") < 1e-10);
    }

    #[test]
    fn large_lambda_zeroes_every_coefficient() {
        let x = DenseMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]])
            .expect("rows");
        let y = [1.0, 2.0, 3.0];
        let fit = fit_lasso(&x, &y, 1e6, &LassoSettings::default()).expect("fit");
        assert_eq!(fit.nonzero_coefficients(), 0);
        assert_close(fit.intercept, 2.0, 1e-12);
        assert!(fit.fitted.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn constant_columns_get_zero_coefficient() {
        let x = DenseMatrix::from_rows(&[vec![1.0, 0.0], vec![1.0, 1.0], vec![1.0, 2.0]])
            .expect("rows");
        let y = [0.0, 2.0, 4.0];
        let fit = fit_lasso(&x, &y, 0.0, &tight()).expect("fit");
        assert_eq!(fit.coefficients[0], 0.0);
        assert_close(fit.coefficients[1], 2.0, 1e-6);
    }

    #[test]
    fn iteration_cap_reports_not_converged() {
        let x = DenseMatrix::from_rows(&[vec![1.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]])
            .expect("rows");
        let y = [2.0, 1.0, 1.5];
        let settings = LassoSettings {
            max_iterations: 1,
            tolerance: 1e-14,
        };
        let fit = fit_lasso(&x, &y, 0.0, &settings).expect("fit");
        assert_eq!(fit.iterations, 1);
        assert!(!fit.converged);
    }

    #[test]
    fn mismatched_target_length_is_a_dimension_error() {
        let x = DenseMatrix::from_rows(&[vec![1.0], vec![0.0]]).expect("rows");
        let err = fit_lasso(&x, &[1.0, 2.0, 3.0], 0.1, &LassoSettings::default())
            .expect_err("target longer than rows");
        assert!(matches!(err, RrdError::DimensionMismatch(_)));
    }

    #[test]
    fn negative_lambda_is_rejected() {
        let x = DenseMatrix::from_rows(&[vec![1.0], vec![0.0]]).expect("rows");
        assert!(matches!(
            fit_lasso(&x, &[1.0, 0.0], -0.1, &LassoSettings::default()),
            Err(RrdError::InvalidInput(_))
        ));
    }
}
