//! ae-dsp: DSP modules for the Aberration Engine
//!
//! Real-time safe processing: nothing in this crate allocates, locks or
//! logs once constructed.
//!
//! ## Modules
//! - `svf` - TPT state-variable filter core (stable under modulation)
//! - `formant` - 3-5 stage formant cascade with makeup gain
//! - `smoothing` - per-voice parameter smoother (parameters, never coefficients)
//! - `limiter` - soft limiter used after cascades and at voice output
//! - `analysis` - envelope, pitch and feature detection
//! - `glottal` - jitter / shimmer / pulse faults
//! - `subharmonic` - sub-octave burst generator
//! - `breath` - aspiration layer
//! - `noise` - triggered corporeal noise events
//! - `denormal` - FTZ/DAZ control

pub mod analysis;
pub mod breath;
pub mod denormal;
pub mod formant;
pub mod glottal;
pub mod limiter;
pub mod noise;
pub mod smoothing;
pub mod subharmonic;
pub mod svf;

use ae_core::Sample;

/// Outcome of one block of stateful processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateHealth {
    /// State stayed finite
    #[default]
    Healthy,
    /// NaN/Inf was found; state was zeroed and the block silenced
    Recovered,
}

impl StateHealth {
    #[inline]
    pub fn is_recovered(self) -> bool {
        self == Self::Recovered
    }

    /// Combine two results (any recovery wins)
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        if self.is_recovered() || other.is_recovered() {
            Self::Recovered
        } else {
            Self::Healthy
        }
    }
}

/// Stateful per-voice stage.
///
/// `reset` returns the stage to the silent state a freshly started voice
/// expects; the engine calls it on voice start, stop and promotion out of
/// the Far tier.
pub trait Processor: Send {
    fn reset(&mut self);

    /// Fixed delay the stage adds to the anchor (samples)
    fn latency(&self) -> usize {
        0
    }
}

/// Stage with a pure sample-in, sample-out path (filters, limiter)
pub trait MonoProcessor: Processor {
    fn process_sample(&mut self, input: Sample) -> Sample;

    /// Run `process_sample` over a block in place
    fn process_block(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}
