//! TPT State Variable Filter
//!
//! Andrew Simper's trapezoidal-integrated SVF ("Solving the continuous SVF
//! equations"). Unlike direct-form biquads the state variables are the
//! integrator memories themselves, so coefficients may change between any two
//! samples without the state becoming inconsistent.
//!
//! Coefficients are always designed fresh from a parameter snapshot
//! (`SvfCoeffs::design`). Nothing here interpolates coefficients.

use ae_core::{Sample, flush_denormal};
use std::f64::consts::PI;

use crate::{MonoProcessor, Processor, StateHealth};

/// Lowest cutoff accepted by `design`
pub const MIN_CUTOFF_HZ: f64 = 20.0;
/// Highest cutoff as a fraction of the sample rate
pub const MAX_CUTOFF_RATIO: f64 = 0.45;
pub const MIN_Q: f64 = 0.5;
pub const MAX_Q: f64 = 40.0;
pub const MAX_GAIN_DB: f64 = 24.0;

/// Filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvfMode {
    Lowpass,
    /// Bandpass normalized to 0 dB at the center
    Bandpass,
    Highpass,
    /// Bell boost/cut around the cutoff
    Peak,
    Notch,
}

/// Musical parameters of one filter stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvfParams {
    pub cutoff_hz: f64,
    pub q: f64,
    /// Only used by `SvfMode::Peak`
    pub gain_db: f64,
}

impl Default for SvfParams {
    fn default() -> Self {
        Self {
            cutoff_hz: 1000.0,
            q: std::f64::consts::FRAC_1_SQRT_2,
            gain_db: 0.0,
        }
    }
}

impl SvfParams {
    pub fn new(cutoff_hz: f64, q: f64) -> Self {
        Self {
            cutoff_hz,
            q,
            gain_db: 0.0,
        }
    }

    pub fn with_gain(mut self, gain_db: f64) -> Self {
        self.gain_db = gain_db;
        self
    }

    /// Copy clamped into the stable design range for a sample rate
    pub fn clamped(&self, sample_rate: f64) -> Self {
        let finite_or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
        let max_cutoff = (sample_rate * MAX_CUTOFF_RATIO).max(MIN_CUTOFF_HZ);
        Self {
            cutoff_hz: finite_or(self.cutoff_hz, 1000.0).clamp(MIN_CUTOFF_HZ, max_cutoff),
            q: finite_or(self.q, MIN_Q).clamp(MIN_Q, MAX_Q),
            gain_db: finite_or(self.gain_db, 0.0).clamp(-MAX_GAIN_DB, MAX_GAIN_DB),
        }
    }
}

/// SVF coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvfCoeffs {
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub m0: f64,
    pub m1: f64,
    pub m2: f64,
}

impl Default for SvfCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl SvfCoeffs {
    /// Identity filter (passthrough) - used as fallback for invalid params
    #[inline]
    pub fn identity() -> Self {
        Self {
            a1: 1.0,
            a2: 0.0,
            a3: 0.0,
            m0: 1.0,
            m1: 0.0,
            m2: 0.0,
        }
    }

    /// Design coefficients from a parameter snapshot
    pub fn design(mode: SvfMode, params: &SvfParams, sample_rate: f64) -> Self {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Self::identity();
        }
        let p = params.clamped(sample_rate);

        let g = (PI * p.cutoff_hz / sample_rate).tan();
        if !g.is_finite() {
            return Self::identity();
        }

        let (k, m0, m1, m2) = match mode {
            SvfMode::Lowpass => {
                let k = 1.0 / p.q;
                (k, 0.0, 0.0, 1.0)
            }
            SvfMode::Bandpass => {
                let k = 1.0 / p.q;
                (k, 0.0, k, 0.0)
            }
            SvfMode::Highpass => {
                let k = 1.0 / p.q;
                (k, 1.0, -k, -1.0)
            }
            SvfMode::Notch => {
                let k = 1.0 / p.q;
                (k, 1.0, -k, 0.0)
            }
            SvfMode::Peak => {
                let a = 10.0_f64.powf(p.gain_db / 40.0);
                if !a.is_finite() || a < 1e-10 {
                    return Self::identity();
                }
                let k = 1.0 / (p.q * a);
                (k, 1.0, k * (a * a - 1.0), 0.0)
            }
        };

        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;

        let coeffs = Self {
            a1,
            a2,
            a3,
            m0,
            m1,
            m2,
        };
        if coeffs.is_finite() { coeffs } else { Self::identity() }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.a1.is_finite()
            && self.a2.is_finite()
            && self.a3.is_finite()
            && self.m0.is_finite()
            && self.m1.is_finite()
            && self.m2.is_finite()
    }
}

/// Integrator memories of one SVF stage
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SvfState {
    pub ic1eq: f64,
    pub ic2eq: f64,
}

impl SvfState {
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.ic1eq.is_finite() && self.ic2eq.is_finite()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.ic1eq == 0.0 && self.ic2eq == 0.0
    }

    /// Snap denormal-range memories to zero
    #[inline]
    pub fn flush(&mut self) {
        self.ic1eq = flush_denormal(self.ic1eq);
        self.ic2eq = flush_denormal(self.ic2eq);
    }
}

/// One TPT/SVF filter stage
#[derive(Debug, Clone)]
pub struct TptSvf {
    mode: SvfMode,
    params: SvfParams,
    coeffs: SvfCoeffs,
    state: SvfState,
    sample_rate: f64,
}

impl TptSvf {
    pub fn new(mode: SvfMode, sample_rate: f64) -> Self {
        let params = SvfParams::default();
        Self {
            mode,
            params,
            coeffs: SvfCoeffs::design(mode, &params, sample_rate),
            state: SvfState::default(),
            sample_rate,
        }
    }

    pub fn with_params(mode: SvfMode, params: SvfParams, sample_rate: f64) -> Self {
        let mut filter = Self::new(mode, sample_rate);
        filter.set_params(params);
        filter
    }

    /// Recompute coefficients from a parameter snapshot
    #[inline]
    pub fn set_params(&mut self, params: SvfParams) {
        self.params = params.clamped(self.sample_rate);
        self.coeffs = SvfCoeffs::design(self.mode, &self.params, self.sample_rate);
    }

    /// Install externally designed coefficients
    #[inline]
    pub fn set_coeffs(&mut self, coeffs: SvfCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn set_mode(&mut self, mode: SvfMode) {
        self.mode = mode;
        self.coeffs = SvfCoeffs::design(mode, &self.params, self.sample_rate);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.set_params(self.params);
    }

    pub fn mode(&self) -> SvfMode {
        self.mode
    }

    pub fn params(&self) -> &SvfParams {
        &self.params
    }

    pub fn coeffs(&self) -> &SvfCoeffs {
        &self.coeffs
    }

    pub fn state(&self) -> &SvfState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SvfState {
        &mut self.state
    }

    /// Process one sample
    #[inline(always)]
    pub fn process(&mut self, v0: Sample) -> Sample {
        let c = &self.coeffs;
        let s = &mut self.state;
        let v3 = v0 - s.ic2eq;
        let v1 = c.a1 * s.ic1eq + c.a2 * v3;
        let v2 = s.ic2eq + c.a2 * s.ic1eq + c.a3 * v3;
        s.ic1eq = 2.0 * v1 - s.ic1eq;
        s.ic2eq = 2.0 * v2 - s.ic2eq;
        c.m0 * v0 + c.m1 * v1 + c.m2 * v2
    }

    /// Process a block in place.
    ///
    /// If the state turns non-finite the state is zeroed, the block is
    /// silenced and `StateHealth::Recovered` is returned.
    pub fn process_block(&mut self, block: &mut [Sample]) -> StateHealth {
        for sample in block.iter_mut() {
            *sample = self.process(*sample);
        }
        self.check_state(block)
    }

    /// Validate state after a block; recover if corrupted
    #[inline]
    pub fn check_state(&mut self, block: &mut [Sample]) -> StateHealth {
        if self.state.is_finite() {
            self.state.flush();
            StateHealth::Healthy
        } else {
            self.state.reset();
            block.fill(0.0);
            StateHealth::Recovered
        }
    }
}

impl Processor for TptSvf {
    fn reset(&mut self) {
        self.state.reset();
    }
}

impl MonoProcessor for TptSvf {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.process(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: f64 = 48000.0;

    fn sine(freq: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / SR).sin())
            .collect()
    }

    fn steady_gain(mode: SvfMode, params: SvfParams, freq: f64) -> f64 {
        let mut filter = TptSvf::with_params(mode, params, SR);
        let mut signal = sine(freq, 48000);
        filter.process_block(&mut signal);
        let tail = &signal[24000..];
        tail.iter().fold(0.0_f64, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_lowpass_passes_low_and_cuts_high() {
        let params = SvfParams::new(1000.0, 0.707);
        assert!(steady_gain(SvfMode::Lowpass, params, 100.0) > 0.95);
        assert!(steady_gain(SvfMode::Lowpass, params, 10000.0) < 0.02);
    }

    #[test]
    fn test_highpass_cuts_low() {
        let params = SvfParams::new(1000.0, 0.707);
        assert!(steady_gain(SvfMode::Highpass, params, 50.0) < 0.01);
        assert!(steady_gain(SvfMode::Highpass, params, 10000.0) > 0.95);
    }

    #[test]
    fn test_peak_gain_at_center() {
        let params = SvfParams::new(1000.0, 2.0).with_gain(12.0);
        let gain = steady_gain(SvfMode::Peak, params, 1000.0);
        assert_relative_eq!(gain, 10.0_f64.powf(12.0 / 20.0), epsilon = 0.05);
    }

    #[test]
    fn test_bandpass_unity_at_center() {
        let params = SvfParams::new(2000.0, 4.0);
        let gain = steady_gain(SvfMode::Bandpass, params, 2000.0);
        assert_relative_eq!(gain, 1.0, epsilon = 0.02);
    }

    #[test]
    fn test_design_clamps_extreme_params() {
        let wild = SvfParams {
            cutoff_hz: 1.0e9,
            q: 0.0,
            gain_db: 400.0,
        };
        let clamped = wild.clamped(SR);
        assert_eq!(clamped.cutoff_hz, SR * MAX_CUTOFF_RATIO);
        assert_eq!(clamped.q, MIN_Q);
        assert_eq!(clamped.gain_db, MAX_GAIN_DB);
        assert!(SvfCoeffs::design(SvfMode::Peak, &wild, SR).is_finite());
    }

    #[test]
    fn test_non_finite_params_fall_back() {
        let nan = SvfParams {
            cutoff_hz: f64::NAN,
            q: f64::INFINITY,
            gain_db: f64::NAN,
        };
        assert!(SvfCoeffs::design(SvfMode::Lowpass, &nan, SR).is_finite());
        assert_eq!(
            SvfCoeffs::design(SvfMode::Lowpass, &nan, f64::NAN),
            SvfCoeffs::identity()
        );
    }

    #[test]
    fn test_nan_state_recovers_and_silences_block() {
        let mut filter = TptSvf::with_params(SvfMode::Lowpass, SvfParams::new(500.0, 1.0), SR);
        filter.state_mut().ic1eq = f64::NAN;

        let mut block = vec![0.5; 64];
        assert_eq!(filter.process_block(&mut block), StateHealth::Recovered);
        assert!(block.iter().all(|&s| s == 0.0));
        assert!(filter.state().is_zero());

        let mut next = vec![0.5; 64];
        assert_eq!(filter.process_block(&mut next), StateHealth::Healthy);
        assert!(next.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_modulated_cutoff_stays_bounded() {
        let mut filter = TptSvf::new(SvfMode::Lowpass, SR);
        let input = sine(220.0, 48000);
        let mut peak = 0.0_f64;
        for (i, &x) in input.iter().enumerate() {
            // Jump the cutoff every 16 samples between extremes
            if i % 16 == 0 {
                let cutoff = if (i / 16) % 2 == 0 { 40.0 } else { 20000.0 };
                filter.set_params(SvfParams::new(cutoff, 20.0));
            }
            peak = peak.max(filter.process(x).abs());
        }
        assert!(peak.is_finite());
        assert!(peak < 100.0, "peak {}", peak);
    }
}
