//! Sample type and block helpers

/// Type alias for audio samples (always f64 for maximum precision)
pub type Sample = f64;

/// Values below this magnitude are treated as denormal and snapped to zero
pub const DENORMAL_THRESHOLD: Sample = 1e-30;

/// Snap tiny values to zero (software fallback where FTZ is unavailable)
#[inline(always)]
pub fn flush_denormal(x: Sample) -> Sample {
    if x.abs() < DENORMAL_THRESHOLD { 0.0 } else { x }
}

/// True if every sample in the block is finite
#[inline]
pub fn block_is_finite(block: &[Sample]) -> bool {
    block.iter().all(|s| s.is_finite())
}

/// Peak absolute value of a block
#[inline]
pub fn block_peak(block: &[Sample]) -> Sample {
    block.iter().fold(0.0, |acc: Sample, s| acc.max(s.abs()))
}

/// RMS of a block (0 for an empty block)
#[inline]
pub fn block_rms(block: &[Sample]) -> Sample {
    if block.is_empty() {
        return 0.0;
    }
    let sum: Sample = block.iter().map(|s| s * s).sum();
    (sum / block.len() as Sample).sqrt()
}
