// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;

pub const DEFAULT_BIT_SIZE: usize = 32;
pub const DEFAULT_HASH_COUNT: usize = 2;
pub const DEFAULT_PERMANENT_PROBABILITY: f64 = 0.5;
pub const DEFAULT_INSTANTANEOUS_PROBABILITY_FOR_ZERO: f64 = 0.5;
pub const DEFAULT_INSTANTANEOUS_PROBABILITY_FOR_ONE: f64 = 0.75;

/// Randomization and encoding constants shared by clients and the decoder.
///
/// Field names follow the RAPPOR paper: `k` bits, `h` hash functions, the
/// permanent randomization probability `f`, and the instantaneous
/// probabilities `p` (report 1 when the permanent bit is 0) and `q`
/// (report 1 when the permanent bit is 1).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSet {
    pub bit_size: usize,
    pub hash_count: usize,
    pub permanent_probability: f64,
    pub instantaneous_probability_for_zero: f64,
    pub instantaneous_probability_for_one: f64,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            bit_size: DEFAULT_BIT_SIZE,
            hash_count: DEFAULT_HASH_COUNT,
            permanent_probability: DEFAULT_PERMANENT_PROBABILITY,
            instantaneous_probability_for_zero: DEFAULT_INSTANTANEOUS_PROBABILITY_FOR_ZERO,
            instantaneous_probability_for_one: DEFAULT_INSTANTANEOUS_PROBABILITY_FOR_ONE,
        }
    }
}

impl ParameterSet {
    pub fn new(
        bit_size: usize,
        hash_count: usize,
        permanent_probability: f64,
        instantaneous_probability_for_zero: f64,
        instantaneous_probability_for_one: f64,
    ) -> Result<Self, RrdError> {
        let params = Self {
            bit_size,
            hash_count,
            permanent_probability,
            instantaneous_probability_for_zero,
            instantaneous_probability_for_one,
        };
        params.validate()?;
        Ok(params)
    }

    /// Expected fraction of observed ones contributed by noise alone:
    /// `p + f/2 * (q - p)`.
    pub fn noise_offset(&self) -> f64 {
        let p = self.instantaneous_probability_for_zero;
        let q = self.instantaneous_probability_for_one;
        p + 0.5 * self.permanent_probability * (q - p)
    }

    /// Scale of the true signal in the observed counts: `(1 - f) * (q - p)`.
    pub fn signal_scale(&self) -> f64 {
        let p = self.instantaneous_probability_for_zero;
        let q = self.instantaneous_probability_for_one;
        (1.0 - self.permanent_probability) * (q - p)
    }

    pub fn validate(&self) -> Result<(), RrdError> {
        if self.bit_size == 0 {
            return Err(RrdError::invalid_input(
                "ParameterSet.bit_size must be >= 1; got 0",
            ));
        }
        if self.hash_count == 0 {
            return Err(RrdError::invalid_input(
                "ParameterSet.hash_count must be >= 1; got 0",
            ));
        }
        for (name, value) in [
            ("permanent_probability", self.permanent_probability),
            (
                "instantaneous_probability_for_zero",
                self.instantaneous_probability_for_zero,
            ),
            (
                "instantaneous_probability_for_one",
                self.instantaneous_probability_for_one,
            ),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(RrdError::invalid_input(format!(
                    "ParameterSet.{name} must be a finite probability in [0, 1]; got {value}"
                )));
            }
        }
        self.check_bias_correction_defined()
    }

    /// Fails with [`RrdError::DivisionUndefined`] when `(1 - f)(q - p) == 0`.
    pub fn check_bias_correction_defined(&self) -> Result<(), RrdError> {
        let scale = self.signal_scale();
        if scale == 0.0 || !scale.is_finite() {
            return Err(RrdError::division_undefined(format!(
                "bias correction requires (1 - f) * (q - p) != 0; got f={}, p={}, q={}",
                self.permanent_probability,
                self.instantaneous_probability_for_zero,
                self.instantaneous_probability_for_one
            )));
        }
        Ok(())
    }
}
