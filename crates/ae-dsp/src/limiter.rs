//! Soft limiter
//!
//! Memoryless tanh knee: linear below the knee, asymptotic to the ceiling
//! above it. Used after every formant cascade and at each voice/bus output.

use ae_core::Sample;

use crate::{MonoProcessor, Processor};

/// Default output ceiling (0 dBFS)
pub const DEFAULT_CEILING: f64 = 1.0;

/// Default knee as a fraction of the ceiling
pub const DEFAULT_KNEE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftLimiter {
    ceiling: f64,
    threshold: f64,
    range: f64,
}

impl Default for SoftLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING, DEFAULT_KNEE)
    }
}

impl SoftLimiter {
    /// `knee` is the fraction of the ceiling where compression starts (0.1 - 0.95)
    pub fn new(ceiling: f64, knee: f64) -> Self {
        let ceiling = if ceiling.is_finite() && ceiling > 0.0 {
            ceiling
        } else {
            DEFAULT_CEILING
        };
        let knee = if knee.is_finite() { knee.clamp(0.1, 0.95) } else { DEFAULT_KNEE };
        let threshold = ceiling * knee;
        Self {
            ceiling,
            threshold,
            range: ceiling - threshold,
        }
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    #[inline(always)]
    pub fn process(&self, x: Sample) -> Sample {
        let mag = x.abs();
        if mag <= self.threshold {
            return x;
        }
        if !mag.is_finite() {
            // NaN carries no sign worth keeping; Inf saturates
            return if x.is_nan() { 0.0 } else { self.ceiling.copysign(x) };
        }
        let over = (mag - self.threshold) / self.range;
        (self.threshold + self.range * over.tanh()).copysign(x)
    }

    pub fn process_slice(&self, block: &mut [Sample]) {
        for s in block.iter_mut() {
            *s = self.process(*s);
        }
    }
}

impl Processor for SoftLimiter {
    fn reset(&mut self) {}
}

impl MonoProcessor for SoftLimiter {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.process(input)
    }
}
