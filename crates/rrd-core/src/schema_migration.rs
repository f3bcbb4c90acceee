// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::{DecodeConfig, ParameterSet, RrdError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current schema version written for configuration payloads.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
/// Maximum additive forward-compatible schema version accepted by readers.
pub const MAX_FORWARD_COMPAT_SCHEMA_VERSION: u32 = 2;

pub type UnknownFields = Map<String, Value>;

/// Validates whether a payload schema version is currently readable.
pub fn validate_schema_version(schema_version: u32, artifact: &str) -> Result<(), RrdError> {
    if (CURRENT_SCHEMA_VERSION..=MAX_FORWARD_COMPAT_SCHEMA_VERSION).contains(&schema_version) {
        return Ok(());
    }

    Err(RrdError::invalid_input(format!(
        "{artifact} schema_version={schema_version} is unsupported; supported versions are {CURRENT_SCHEMA_VERSION}..={MAX_FORWARD_COMPAT_SCHEMA_VERSION}"
    )))
}

/// Wire format for versioned randomization parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSetWire {
    pub schema_version: u32,
    #[serde(flatten)]
    pub params: ParameterSet,
    #[serde(default, flatten)]
    pub unknown_fields: UnknownFields,
}

impl ParameterSetWire {
    pub fn from_runtime(params: ParameterSet) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            params,
            unknown_fields: UnknownFields::new(),
        }
    }

    pub fn into_runtime_parts(self) -> Result<(ParameterSet, UnknownFields), RrdError> {
        validate_schema_version(self.schema_version, "ParameterSet")?;
        self.params.validate()?;
        Ok((self.params, self.unknown_fields))
    }

    pub fn to_runtime(self) -> Result<ParameterSet, RrdError> {
        let (params, _) = self.into_runtime_parts()?;
        Ok(params)
    }
}

/// Wire format for versioned binning/regression hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodeConfigWire {
    pub schema_version: u32,
    #[serde(flatten)]
    pub config: DecodeConfig,
    #[serde(default, flatten)]
    pub unknown_fields: UnknownFields,
}

impl DecodeConfigWire {
    pub fn from_runtime(config: DecodeConfig) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            config,
            unknown_fields: UnknownFields::new(),
        }
    }

    pub fn into_runtime_parts(self) -> Result<(DecodeConfig, UnknownFields), RrdError> {
        validate_schema_version(self.schema_version, "DecodeConfig")?;
        self.config.validate()?;
        Ok((self.config, self.unknown_fields))
    }

    pub fn to_runtime(self) -> Result<DecodeConfig, RrdError> {
        let (config, _) = self.into_runtime_parts()?;
        Ok(config)
    }
}
