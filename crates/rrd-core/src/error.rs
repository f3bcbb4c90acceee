// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Error returned by every fallible decode operation.
///
/// The variants separate caller mistakes (`InvalidInput`), properties of the
/// randomization parameters (`DivisionUndefined`), shape errors between stage
/// outputs (`DimensionMismatch`) and regression failures (`ModelFitting`), so
/// an outer layer can map each to its own response without parsing messages.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RrdError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("division undefined: {0}")]
    DivisionUndefined(String),
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("model fitting failed: {0}")]
    ModelFitting(String),
    #[error("numerical issue: {0}")]
    NumericalIssue(String),
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
    #[error("cancelled")]
    Cancelled,
}

impl RrdError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn division_undefined(msg: impl Into<String>) -> Self {
        Self::DivisionUndefined(msg.into())
    }

    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    pub fn model_fitting(msg: impl Into<String>) -> Self {
        Self::ModelFitting(msg.into())
    }

    pub fn numerical_issue(msg: impl Into<String>) -> Self {
        Self::NumericalIssue(msg.into())
    }

    pub fn resource_limit(msg: impl Into<String>) -> Self {
        Self::ResourceLimit(msg.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    /// Stable machine-readable code for structured error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::DivisionUndefined(_) => "division_undefined",
            Self::DimensionMismatch(_) => "dimension_mismatch",
            Self::ModelFitting(_) => "model_fitting",
            Self::NumericalIssue(_) => "numerical_issue",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RrdError;

    #[test]
    fn display_prefixes_match_error_kind() {
        assert_eq!(
            RrdError::invalid_input("empty cohort").to_string(),
            "invalid input: empty cohort"
        );
        assert_eq!(
            RrdError::division_undefined("q == p").to_string(),
            "division undefined: q == p"
        );
        assert_eq!(
            RrdError::dimension_mismatch("rows=16, target=15").to_string(),
            "dimension mismatch: rows=16, target=15"
        );
        assert_eq!(
            RrdError::model_fitting("no usable lambda").to_string(),
            "model fitting failed: no usable lambda"
        );
        assert_eq!(RrdError::cancelled().to_string(), "cancelled");
    }

    #[test]
    fn codes_are_distinct_per_variant() {
        let codes = [
            RrdError::invalid_input("").code(),
            RrdError::division_undefined("").code(),
            RrdError::dimension_mismatch("").code(),
            RrdError::model_fitting("").code(),
            RrdError::numerical_issue("").code(),
            RrdError::resource_limit("").code(),
            RrdError::cancelled().code(),
        ];
        for (i, left) in codes.iter().enumerate() {
            for right in &codes[i + 1..] {
                assert_ne!(left, right);
            }
        }
        assert_eq!(RrdError::cancelled().code(), "cancelled");
    }
}
