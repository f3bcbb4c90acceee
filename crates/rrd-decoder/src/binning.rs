// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

#[cfg(feature = "rayon")]
use crate::parallel::can_use_parallel;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use rrd_core::{
    Bin, BinRange, BudgetStatus, DecodeContext, DecodeStage, DenseMatrix, ExecutionContext,
    PipelineState, RrdError, bin_label,
};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use tracing::{debug, warn};

/// Maps a candidate label to the Bloom-filter positions a client would have
/// set for it.
///
/// Implementations must match the client encoder bit for bit and must return
/// exactly `hash_count` indices, each in `[0, bit_size)`.
pub trait CandidateEncoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn bloom_indices(&self, candidate: &str, bit_size: usize, hash_count: usize) -> Vec<usize>;
}

/// Index `i` is the first 8 bytes (big endian) of
/// `SHA-256(u32_be(i) || utf8(candidate))`, reduced modulo `bit_size`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Encoder;

impl CandidateEncoder for Sha256Encoder {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn bloom_indices(&self, candidate: &str, bit_size: usize, hash_count: usize) -> Vec<usize> {
        (0..hash_count)
            .map(|i| {
                let seed = u32::try_from(i).unwrap_or(u32::MAX);
                let mut hasher = Sha256::new();
                hasher.update(seed.to_be_bytes());
                hasher.update(candidate.as_bytes());
                let digest = hasher.finalize();
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                (u64::from_be_bytes(prefix) % bit_size as u64) as usize
            })
            .collect()
    }
}

fn check_encoding_shape(bit_size: usize, hash_count: usize) -> Result<(), RrdError> {
    if bit_size == 0 {
        return Err(RrdError::invalid_input("bit_size must be >= 1; got 0"));
    }
    if hash_count == 0 || u32::try_from(hash_count).is_err() {
        return Err(RrdError::invalid_input(format!(
            "hash_count must be in 1..={}; got {hash_count}",
            u32::MAX
        )));
    }
    Ok(())
}

/// Bloom-filter indices for the candidate range `"<start>-<end>"`.
pub fn map_candidate_to_indices(
    encoder: &dyn CandidateEncoder,
    start: u64,
    end: u64,
    bit_size: usize,
    hash_count: usize,
) -> Result<Vec<usize>, RrdError> {
    check_encoding_shape(bit_size, hash_count)?;
    let label = bin_label(start, end);
    let indices = encoder.bloom_indices(&label, bit_size, hash_count);
    if indices.len() != hash_count {
        return Err(RrdError::dimension_mismatch(format!(
            "encoder '{}' returned {} indices for '{label}', expected hash_count={hash_count}",
            encoder.name(),
            indices.len()
        )));
    }
    if let Some(&bad) = indices.iter().find(|&&idx| idx >= bit_size) {
        return Err(RrdError::dimension_mismatch(format!(
            "encoder '{}' returned index {bad} for '{label}', outside [0, {bit_size})",
            encoder.name()
        )));
    }
    Ok(indices)
}

/// Splits `range` into consecutive bins and hashes each label.
pub fn build_bins(
    range: &BinRange,
    bit_size: usize,
    hash_count: usize,
    encoder: &dyn CandidateEncoder,
    exec: &ExecutionContext<'_>,
) -> Result<Vec<Bin>, RrdError> {
    let count = range.bin_count()?;
    let make_bin = |idx: usize| -> Result<Bin, RrdError> {
        let (start, end) = range.bounds(idx)?;
        let indices = map_candidate_to_indices(encoder, start, end, bit_size, hash_count)?;
        Ok(Bin::new(start, end, indices))
    };

    #[cfg(feature = "rayon")]
    if can_use_parallel(exec) {
        return (0..count).into_par_iter().map(&make_bin).collect();
    }

    let mut bins = Vec::new();
    bins.try_reserve_exact(count).map_err(|err| {
        RrdError::resource_limit(format!("cannot allocate {count} bins: {err}"))
    })?;
    for idx in 0..count {
        exec.check_cancelled_every(idx, 1024)?;
        bins.push(make_bin(idx)?);
    }
    Ok(bins)
}

/// One row per bin, `bit_size` columns, 1.0 at each of the bin's indices.
pub fn design_matrix_from_bins(bins: &[Bin], bit_size: usize) -> Result<DenseMatrix, RrdError> {
    let mut matrix = DenseMatrix::zeros(bins.len(), bit_size)?;
    for (row, bin) in bins.iter().enumerate() {
        for &idx in &bin.indices {
            matrix.set(row, idx, 1.0).map_err(|_| {
                RrdError::dimension_mismatch(format!(
                    "bin '{}' has index {idx} outside [0, {bit_size})",
                    bin.label
                ))
            })?;
        }
    }
    Ok(matrix)
}

/// Returns the bins of `range` and their `bins x bit_size` design matrix.
pub fn build_design_matrix(
    range: &BinRange,
    bit_size: usize,
    hash_count: usize,
    encoder: &dyn CandidateEncoder,
    exec: &ExecutionContext<'_>,
) -> Result<(Vec<Bin>, DenseMatrix), RrdError> {
    let bins = build_bins(range, bit_size, hash_count, encoder, exec)?;
    let matrix = design_matrix_from_bins(&bins, bit_size)?;
    Ok((bins, matrix))
}

/// Candidate-range generation and design-matrix assembly.
pub struct BinningStage {
    encoder: Box<dyn CandidateEncoder>,
}

impl BinningStage {
    pub fn new() -> Self {
        Self::with_encoder(Sha256Encoder)
    }

    pub fn with_encoder(encoder: impl CandidateEncoder + 'static) -> Self {
        Self {
            encoder: Box::new(encoder),
        }
    }

    pub fn encoder(&self) -> &dyn CandidateEncoder {
        self.encoder.as_ref()
    }
}

impl Default for BinningStage {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeStage for BinningStage {
    fn name(&self) -> &'static str {
        "binning"
    }

    fn process<'a>(
        &self,
        mut ctx: DecodeContext<'a>,
        exec: &ExecutionContext<'_>,
    ) -> Result<DecodeContext<'a>, RrdError> {
        ctx.require_state(PipelineState::Aggregated, self.name())?;
        let bit_size = ctx.bit_size();
        let bin_count = ctx.range.bin_count()?;

        let cells = bin_count.checked_mul(bit_size).ok_or_else(|| {
            RrdError::resource_limit(format!(
                "design matrix size overflow for bins={bin_count}, bit_size={bit_size}"
            ))
        })?;
        if exec.check_design_budget(cells)? == BudgetStatus::ExceededSoftDegrade {
            ctx.diagnostics.warnings.push(format!(
                "design matrix of {cells} cells exceeds constraints.max_design_cells; continuing under SoftDegrade"
            ));
        }
        if bin_count > bit_size {
            warn!(bin_count, bit_size, "more candidate bins than bit positions");
            ctx.diagnostics.warnings.push(format!(
                "bin_count={bin_count} exceeds bit_size={bit_size}; the regression is underdetermined"
            ));
        }

        let (bins, matrix) = build_design_matrix(
            &ctx.range,
            bit_size,
            ctx.params.hash_count,
            self.encoder(),
            exec,
        )?;
        debug!(
            bins = bins.len(),
            bit_size,
            encoder = self.encoder.name(),
            "design matrix assembled"
        );

        ctx.diagnostics.bin_count = bins.len();
        ctx.diagnostics.encoder = Cow::Borrowed(self.encoder.name());
        ctx.bins = bins;
        ctx.design_matrix = matrix;
        ctx.state = PipelineState::Binned;
        Ok(ctx)
    }
}
