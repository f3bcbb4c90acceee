// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Controls whether a decode may trade strict sequential execution for speed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReproMode {
    /// Single-threaded, fixed evaluation order.
    Strict,
    #[default]
    Balanced,
    Fast,
}

impl ReproMode {
    pub fn allows_parallel(self) -> bool {
        !matches!(self, Self::Strict)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Balanced => "balanced",
            Self::Fast => "fast",
        }
    }
}
