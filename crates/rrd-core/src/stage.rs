// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;
use crate::context::DecodeContext;
use crate::execution_context::ExecutionContext;

/// One step of the decode pipeline.
///
/// A stage takes ownership of the context, enriches it, and hands it back.
/// Stages hold configuration only; all run state travels in the context.
pub trait DecodeStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn process<'a>(
        &self,
        ctx: DecodeContext<'a>,
        exec: &ExecutionContext<'_>,
    ) -> Result<DecodeContext<'a>, RrdError>;
}
