// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;

pub const DEFAULT_LAMBDAS: [f64; 5] = [0.01, 0.05, 0.1, 0.2, 0.4];
pub const DEFAULT_BIN_WIDTH: u64 = 100;
pub const DEFAULT_BIN_START: u64 = 0;
pub const DEFAULT_LASSO_MAX_ITERATIONS: usize = 1000;
pub const DEFAULT_LASSO_TOLERANCE: f64 = 1e-4;
/// Ceiling on the number of candidate bins a range may produce.
pub const MAX_BIN_COUNT: usize = 100_000;

/// Solver settings shared by every candidate L1 fit.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LassoSettings {
    /// Maximum full coordinate sweeps per fit.
    pub max_iterations: usize,
    /// Convergence threshold on the largest coefficient change in a sweep,
    /// relative to the target scale.
    pub tolerance: f64,
}

impl Default for LassoSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_LASSO_MAX_ITERATIONS,
            tolerance: DEFAULT_LASSO_TOLERANCE,
        }
    }
}

impl LassoSettings {
    pub fn validate(&self) -> Result<(), RrdError> {
        if self.max_iterations == 0 {
            return Err(RrdError::invalid_input(
                "LassoSettings.max_iterations must be >= 1; got 0",
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(RrdError::invalid_input(format!(
                "LassoSettings.tolerance must be finite and > 0; got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Binning and regression hyperparameters for one decode run.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeConfig {
    /// Candidate regularization strengths, evaluated in order.
    pub lambdas: Vec<f64>,
    pub bin_width: u64,
    pub bin_start: u64,
    /// Exclusive upper bound of the binned range; `None` sizes it from the
    /// largest reported value.
    pub bin_upper_bound: Option<u64>,
    pub lasso: LassoSettings,
    /// Cancellation is polled before every `cancel_check_every`-th fit.
    pub cancel_check_every: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            lambdas: DEFAULT_LAMBDAS.to_vec(),
            bin_width: DEFAULT_BIN_WIDTH,
            bin_start: DEFAULT_BIN_START,
            bin_upper_bound: None,
            lasso: LassoSettings::default(),
            cancel_check_every: 1,
        }
    }
}

impl DecodeConfig {
    pub fn validate(&self) -> Result<(), RrdError> {
        validate_lambdas(&self.lambdas)?;
        if self.bin_width == 0 {
            return Err(RrdError::invalid_input(
                "DecodeConfig.bin_width must be >= 1; got 0",
            ));
        }
        if let Some(upper) = self.bin_upper_bound
            && upper <= self.bin_start
        {
            return Err(RrdError::invalid_input(format!(
                "DecodeConfig.bin_upper_bound must be > bin_start; got bin_start={}, bin_upper_bound={upper}",
                self.bin_start
            )));
        }
        self.lasso.validate()
    }
}

/// Requires a non-empty set of finite, non-negative regularization strengths.
pub fn validate_lambdas(lambdas: &[f64]) -> Result<(), RrdError> {
    if lambdas.is_empty() {
        return Err(RrdError::invalid_input(
            "at least one candidate lambda is required",
        ));
    }
    if let Some((idx, lambda)) = lambdas
        .iter()
        .enumerate()
        .find(|(_, lambda)| !lambda.is_finite() || **lambda < 0.0)
    {
        return Err(RrdError::invalid_input(format!(
            "lambdas[{idx}] must be finite and >= 0; got {lambda}"
        )));
    }
    Ok(())
}

/// Half-open candidate range `[start, upper_bound)` cut into `width`-sized bins.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinRange {
    pub start: u64,
    pub width: u64,
    pub upper_bound: u64,
}

impl BinRange {
    pub fn new(start: u64, width: u64, upper_bound: u64) -> Result<Self, RrdError> {
        let range = Self {
            start,
            width,
            upper_bound,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), RrdError> {
        if self.width == 0 {
            return Err(RrdError::invalid_input("bin width must be >= 1; got 0"));
        }
        if self.upper_bound <= self.start {
            return Err(RrdError::invalid_input(format!(
                "bin upper bound must be > start; got start={}, upper_bound={}",
                self.start, self.upper_bound
            )));
        }
        Ok(())
    }

    /// `ceil((upper_bound - start) / width)`, at most [`MAX_BIN_COUNT`].
    pub fn bin_count(&self) -> Result<usize, RrdError> {
        self.validate()?;
        let count = (self.upper_bound - self.start).div_ceil(self.width);
        match usize::try_from(count) {
            Ok(count) if count <= MAX_BIN_COUNT => Ok(count),
            _ => Err(RrdError::resource_limit(format!(
                "range [{}, {}) with width {} yields {count} bins; at most {MAX_BIN_COUNT} are supported",
                self.start, self.upper_bound, self.width
            ))),
        }
    }

    /// Start and end of the `index`-th bin.
    pub fn bounds(&self, index: usize) -> Result<(u64, u64), RrdError> {
        let overflow = || {
            RrdError::resource_limit(format!(
                "bin bounds overflow at index={index}, start={}, width={}",
                self.start, self.width
            ))
        };
        let offset = u64::try_from(index)
            .ok()
            .and_then(|idx| idx.checked_mul(self.width))
            .ok_or_else(overflow)?;
        let bin_start = self.start.checked_add(offset).ok_or_else(overflow)?;
        let bin_end = bin_start.checked_add(self.width).ok_or_else(overflow)?;
        Ok((bin_start, bin_end))
    }
}
