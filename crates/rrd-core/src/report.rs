// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;

/// One client submission: a randomized bit string plus the numeric attribute
/// used to place it into candidate ranges.
///
/// Identifiers are carried through untouched and never interpreted by the
/// decoder.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Permanently randomized bit string (PRR), one `'0'`/`'1'` per position.
    pub bits: String,
    /// Numeric attribute, e.g. a step count.
    pub value: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub irr: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub report_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub device_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cohort_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parameter_id: Option<String>,
}

impl Report {
    pub fn new(bits: impl Into<String>, value: u64) -> Self {
        Self {
            bits: bits.into(),
            value,
            ..Self::default()
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }
}

/// Checks the cohort-level preconditions of a decode run: at least one
/// report, and every bit string exactly `bit_size` characters of `0`/`1`.
pub fn validate_reports(reports: &[Report], bit_size: usize) -> Result<(), RrdError> {
    if reports.is_empty() {
        return Err(RrdError::invalid_input(
            "decode requires at least one report; got an empty cohort",
        ));
    }

    for (idx, report) in reports.iter().enumerate() {
        if report.bits.len() != bit_size {
            return Err(RrdError::invalid_input(format!(
                "report[{idx}] bit string length {} does not match configured bit_size={bit_size}",
                report.bits.len()
            )));
        }
        if let Some(pos) = report.bits.bytes().position(|b| b != b'0' && b != b'1') {
            return Err(RrdError::invalid_input(format!(
                "report[{idx}] bit string has a non-binary character at position {pos}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Report, validate_reports};
    use crate::RrdError;

    #[test]
    fn accepts_uniform_binary_cohort() {
        let reports = vec![
            Report::new("0101010000100111", 8448),
            Report::new("1111000011110000", 12),
        ];
        validate_reports(&reports, 16).expect("valid cohort should pass");
    }

    #[test]
    fn rejects_empty_cohort() {
        let err = validate_reports(&[], 16).expect_err("empty cohort should fail");
        assert!(matches!(err, RrdError::InvalidInput(_)));
    }

    #[test]
    fn rejects_length_mismatch_on_any_report() {
        let reports = vec![
            Report::new("0101010000100111", 1),
            Report::new("010101000010011", 2),
        ];
        let err = validate_reports(&reports, 16).expect_err("short report should fail");
        assert!(err.to_string().contains("report[1]"));
    }

    #[test]
    fn rejects_non_binary_characters() {
        let reports = vec![Report::new("01x1", 1)];
        let err = validate_reports(&reports, 4).expect_err("non-binary char should fail");
        assert!(err.to_string().contains("position 2"));
    }
}
