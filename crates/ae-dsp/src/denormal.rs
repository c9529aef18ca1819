//! Denormal Protection
//!
//! Near-silent decaying signals push filter memories into the subnormal
//! range, where x86 FPUs slow down by 10-100x. The audio thread enables
//! flush-to-zero / denormals-are-zero before it processes anything.

/// Set CPU flags to flush denormals to zero (DAZ + FTZ on x86_64, FZ on aarch64).
///
/// The flags are per-thread: call this on the audio thread before the first
/// block, or hold a `DenormalGuard` around processing.
#[inline]
pub fn enable_flush_to_zero() {
    set_mode(read_mode() | FTZ_BITS);
}

/// Restore IEEE denormal handling on the current thread
#[inline]
pub fn disable_flush_to_zero() {
    set_mode(read_mode() & !FTZ_BITS);
}

/// True if flush-to-zero is active on the current thread
#[inline]
pub fn flush_to_zero_enabled() -> bool {
    if FTZ_BITS == 0 {
        return false;
    }
    read_mode() & FTZ_BITS == FTZ_BITS
}

/// Enables flush-to-zero for its lifetime and restores the previous mode on drop
#[must_use = "the previous mode is restored when the guard is dropped"]
pub struct DenormalGuard {
    previous: ModeBits,
}

impl DenormalGuard {
    pub fn new() -> Self {
        let previous = read_mode();
        set_mode(previous | FTZ_BITS);
        Self { previous }
    }
}

impl Default for DenormalGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DenormalGuard {
    fn drop(&mut self) {
        set_mode(self.previous);
    }
}

#[cfg(target_arch = "x86_64")]
type ModeBits = u32;
// DAZ (Denormals Are Zero) = bit 6 (0x0040)
// FTZ (Flush To Zero) = bit 15 (0x8000)
#[cfg(target_arch = "x86_64")]
const FTZ_BITS: ModeBits = 0x8040;

#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(deprecated)]
fn read_mode() -> ModeBits {
    // Safety: reading MXCSR has no side effects
    unsafe { std::arch::x86_64::_mm_getcsr() }
}

#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(deprecated)]
fn set_mode(bits: ModeBits) {
    // Safety: only the rounding/denormal control bits we read back are written
    unsafe { std::arch::x86_64::_mm_setcsr(bits) }
}

#[cfg(target_arch = "aarch64")]
type ModeBits = u64;
// FPCR.FZ = bit 24
#[cfg(target_arch = "aarch64")]
const FTZ_BITS: ModeBits = 1 << 24;

#[cfg(target_arch = "aarch64")]
#[inline]
fn read_mode() -> ModeBits {
    let fpcr: u64;
    // Safety: reading FPCR has no side effects
    unsafe {
        std::arch::asm!("mrs {}, fpcr", out(reg) fpcr, options(nomem, nostack, preserves_flags));
    }
    fpcr
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn set_mode(bits: ModeBits) {
    // Safety: FPCR only controls floating-point behaviour of this thread
    unsafe {
        std::arch::asm!("msr fpcr, {}", in(reg) bits, options(nomem, nostack, preserves_flags));
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
type ModeBits = u32;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const FTZ_BITS: ModeBits = 0;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn read_mode() -> ModeBits {
    0
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn set_mode(_bits: ModeBits) {}
