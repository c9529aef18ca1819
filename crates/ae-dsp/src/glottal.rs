//! Glottal Incoherence Module
//!
//! Makes the anchor's voicing irregular:
//! - jitter: the signal is read from a delay line whose offset drifts to a new
//!   random value every pseudo-period, stretching and squeezing pitch periods
//! - shimmer: per-period random gain, symmetric in dB
//! - pulse faults (Full mode only): rare dropped pulses (Hann dip) and doubled
//!   pulses (half-period echo)
//!
//! The pseudo-period follows a zero-crossing pitch tracker on the input. The
//! delay line is allocated once at construction.

use ae_core::{AberrationParameters, GlottalTuning, Sample, db_to_gain};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;

use crate::analysis::ZeroCrossingPitch;
use crate::{Processor, StateHealth};

/// Largest jitter excursion a profile may request (ms)
pub const MAX_JITTER_LIMIT_MS: f64 = 5.0;

/// Depth of a dropped pulse (dB)
pub const DROPPED_PULSE_DB: f64 = -14.0;

/// Level of the echo that doubles a pulse
const DOUBLED_PULSE_GAIN: f64 = 0.5;

/// How much of the module runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlottalMode {
    /// Bypass
    #[default]
    Off,
    /// Jitter and shimmer only
    Light,
    /// Jitter, shimmer and pulse faults
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PulseFault {
    None,
    Dropped,
    Doubled,
}

/// Per-voice glottal incoherence processor
#[derive(Debug, Clone)]
pub struct GlottalModule {
    sample_rate: f64,
    mode: GlottalMode,
    tuning: GlottalTuning,
    ring: Vec<Sample>,
    mask: usize,
    write_pos: usize,
    base_delay: f64,
    tracker: ZeroCrossingPitch,
    rng: ChaCha8Rng,
    period_len: f64,
    period_pos: f64,
    offset_from: f64,
    offset_to: f64,
    gain_from: f64,
    gain_to: f64,
    fault: PulseFault,
    pulse_faults: u64,
}

impl GlottalModule {
    pub fn new(sample_rate: f64, seed: u64) -> Self {
        let base_delay = (MAX_JITTER_LIMIT_MS * 0.001 * sample_rate).ceil() + 2.0;
        // Room for the jitter swing plus a half-period echo at the lowest pitch
        let span = 2.0 * base_delay + sample_rate / 120.0 + 8.0;
        let len = (span as usize).next_power_of_two();
        let tracker = ZeroCrossingPitch::new(sample_rate);
        Self {
            sample_rate,
            mode: GlottalMode::Off,
            tuning: GlottalTuning::default(),
            ring: vec![0.0; len],
            mask: len - 1,
            write_pos: 0,
            base_delay,
            period_len: tracker.period_samples(),
            tracker,
            rng: ChaCha8Rng::seed_from_u64(seed),
            period_pos: 0.0,
            offset_from: 0.0,
            offset_to: 0.0,
            gain_from: 1.0,
            gain_to: 1.0,
            fault: PulseFault::None,
            pulse_faults: 0,
        }
    }

    /// Install a profile's thresholds
    pub fn configure(&mut self, tuning: &GlottalTuning, mode: GlottalMode) {
        self.tuning = GlottalTuning {
            max_jitter_ms: tuning.max_jitter_ms.clamp(0.0, MAX_JITTER_LIMIT_MS),
            max_shimmer_db: tuning.max_shimmer_db.clamp(0.0, 6.0),
            pulse_fault_rate: tuning.pulse_fault_rate.clamp(0.0, 1.0),
        };
        self.mode = mode;
    }

    pub fn set_mode(&mut self, mode: GlottalMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> GlottalMode {
        self.mode
    }

    /// Restart the random sequence (voice start)
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Number of dropped or doubled pulses produced so far
    pub fn pulse_faults(&self) -> u64 {
        self.pulse_faults
    }

    fn begin_period(&mut self, jitter: f64, shimmer: f64) {
        self.period_pos = 0.0;
        self.period_len = self.tracker.period_samples().max(1.0);

        let max_offset = jitter * self.tuning.max_jitter_ms * 0.001 * self.sample_rate;
        self.offset_from = self.offset_to;
        self.offset_to = if max_offset > 0.0 {
            max_offset * self.rng.random_range(-1.0..=1.0)
        } else {
            0.0
        };

        let max_db = shimmer * self.tuning.max_shimmer_db;
        self.gain_from = self.gain_to;
        self.gain_to = if max_db > 0.0 {
            db_to_gain(max_db * self.rng.random_range(-1.0..=1.0))
        } else {
            1.0
        };

        self.fault = PulseFault::None;
        if self.mode == GlottalMode::Full {
            let p = (self.tuning.pulse_fault_rate * jitter).clamp(0.0, 1.0);
            if p > 0.0 && self.rng.random_bool(p) {
                self.fault = if self.rng.random_bool(0.5) {
                    PulseFault::Dropped
                } else {
                    PulseFault::Doubled
                };
                self.pulse_faults += 1;
            }
        }
    }

    #[inline]
    fn read(&self, delay: f64) -> Sample {
        let delay = delay.clamp(0.0, (self.ring.len() - 2) as f64);
        let whole = delay.floor();
        let frac = delay - whole;
        let i0 = (self.write_pos + self.ring.len() - whole as usize) & self.mask;
        let i1 = (i0 + self.ring.len() - 1) & self.mask;
        self.ring[i0] * (1.0 - frac) + self.ring[i1] * frac
    }

    /// Process a block in place with the current jitter/shimmer amounts
    pub fn process_block(&mut self, block: &mut [Sample], params: &AberrationParameters) -> StateHealth {
        if self.mode == GlottalMode::Off {
            return StateHealth::Healthy;
        }
        let jitter = params.jitter;
        let shimmer = params.shimmer;
        let dip_depth = 1.0 - db_to_gain(DROPPED_PULSE_DB);

        for sample in block.iter_mut() {
            let x = *sample;
            self.write_pos = (self.write_pos + 1) & self.mask;
            self.ring[self.write_pos] = x;
            self.tracker.process(x);

            self.period_pos += 1.0;
            if self.period_pos >= self.period_len {
                self.begin_period(jitter, shimmer);
            }

            let t = self.period_pos / self.period_len;
            let offset = self.offset_from + (self.offset_to - self.offset_from) * t;
            let gain = self.gain_from + (self.gain_to - self.gain_from) * t;
            let mut y = self.read(self.base_delay + offset);

            match self.fault {
                PulseFault::None => {}
                PulseFault::Dropped => {
                    let hann = 0.5 - 0.5 * (2.0 * PI * t).cos();
                    y *= 1.0 - dip_depth * hann;
                }
                PulseFault::Doubled => {
                    let hann = 0.5 - 0.5 * (2.0 * PI * t).cos();
                    let echo = self.read(self.base_delay + offset + 0.5 * self.period_len);
                    y += DOUBLED_PULSE_GAIN * hann * echo;
                }
            }

            *sample = y * gain;
        }

        if block.iter().all(|s| s.is_finite()) {
            StateHealth::Healthy
        } else {
            self.reset();
            block.fill(0.0);
            StateHealth::Recovered
        }
    }
}

impl Processor for GlottalModule {
    fn reset(&mut self) {
        self.ring.fill(0.0);
        self.write_pos = 0;
        self.tracker.reset();
        self.period_len = self.tracker.period_samples();
        self.period_pos = 0.0;
        self.offset_from = 0.0;
        self.offset_to = 0.0;
        self.gain_from = 1.0;
        self.gain_to = 1.0;
        self.fault = PulseFault::None;
    }

    fn latency(&self) -> usize {
        if self.mode == GlottalMode::Off {
            0
        } else {
            self.base_delay as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::period_jitter;
    use ae_core::block_rms;

    const SR: f64 = 48000.0;

    /// 120 Hz train of raised-cosine pulses
    fn pulse_train(len: usize) -> Vec<f64> {
        let period = SR / 120.0;
        (0..len)
            .map(|i| {
                let phase = (i as f64 % period) / period;
                0.6 * (2.0 * PI * phase).sin() * (0.5 - 0.5 * (2.0 * PI * phase).cos())
            })
            .collect()
    }

    fn run(module: &mut GlottalModule, input: &[f64], params: &AberrationParameters) -> Vec<f64> {
        let mut out = input.to_vec();
        for chunk in out.chunks_mut(256) {
            module.process_block(chunk, params);
        }
        out
    }

    #[test]
    fn test_zero_amount_is_pure_delay() {
        let mut module = GlottalModule::new(SR, 1);
        module.configure(&GlottalTuning::default(), GlottalMode::Full);
        let input = pulse_train(4800);
        let out = run(&mut module, &input, &AberrationParameters::neutral());
        let latency = module.latency();
        assert!(latency > 0);
        for i in latency..input.len() {
            assert!((out[i] - input[i - latency]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_off_mode_bypasses() {
        let mut module = GlottalModule::new(SR, 1);
        let input = pulse_train(1024);
        let mut params = AberrationParameters::neutral();
        params.jitter = 1.0;
        assert_eq!(run(&mut module, &input, &params), input);
        assert_eq!(module.latency(), 0);
    }

    #[test]
    fn test_jitter_makes_periods_irregular() {
        let input = pulse_train(48000);
        assert!(period_jitter(&input, SR).unwrap_or(1.0) < 0.01);

        let mut module = GlottalModule::new(SR, 7);
        module.configure(&GlottalTuning::default(), GlottalMode::Light);
        let mut params = AberrationParameters::neutral();
        params.jitter = 1.0;
        let out = run(&mut module, &input, &params);
        let j = period_jitter(&out[module.latency()..], SR).unwrap_or(0.0);
        assert!(j > 0.02, "jitter {}", j);
    }

    #[test]
    fn test_energy_within_3db() {
        let input = pulse_train(96000);
        let mut module = GlottalModule::new(SR, 11);
        module.configure(&GlottalTuning::default(), GlottalMode::Full);
        let mut params = AberrationParameters::neutral();
        params.jitter = 1.0;
        params.shimmer = 1.0;
        let out = run(&mut module, &input, &params);

        let ratio_db = 20.0 * (block_rms(&out) / block_rms(&input)).log10();
        assert!(ratio_db.abs() < 3.0, "energy change {} dB", ratio_db);
    }

    #[test]
    fn test_zombie_shimmer_stays_within_3db() {
        use ae_core::{Archetype, ArchetypeProfile, EmotionState};

        let profile = ArchetypeProfile::preset(Archetype::Zombie);
        let exhausted = profile.target_for(&EmotionState {
            fatigue: 1.0,
            ..EmotionState::default()
        });
        let input = pulse_train(96000);

        for params in [profile.target, exhausted] {
            assert!(params.shimmer > 0.5);
            for seed in 1..=4 {
                let mut module = GlottalModule::new(SR, seed);
                module.configure(&profile.glottal, GlottalMode::Full);
                let out = run(&mut module, &input, &params);

                // Align for the fixed delay before comparing levels
                let latency = module.latency();
                let wet = &out[latency..];
                let dry = &input[..input.len() - latency];
                let ratio_db = 20.0 * (block_rms(wet) / block_rms(dry)).log10();
                assert!(
                    ratio_db.abs() < 3.0,
                    "seed {} shimmer {}: energy change {} dB",
                    seed,
                    params.shimmer,
                    ratio_db
                );
            }
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let input = pulse_train(9600);
        let mut params = AberrationParameters::neutral();
        params.jitter = 0.8;
        params.shimmer = 0.5;

        let mut a = GlottalModule::new(SR, 99);
        let mut b = GlottalModule::new(SR, 99);
        a.configure(&GlottalTuning::default(), GlottalMode::Full);
        b.configure(&GlottalTuning::default(), GlottalMode::Full);
        assert_eq!(run(&mut a, &input, &params), run(&mut b, &input, &params));
    }

    #[test]
    fn test_full_mode_produces_pulse_faults() {
        let input = pulse_train(480000);
        let mut module = GlottalModule::new(SR, 3);
        let tuning = GlottalTuning {
            pulse_fault_rate: 0.2,
            ..GlottalTuning::default()
        };
        module.configure(&tuning, GlottalMode::Full);
        let mut params = AberrationParameters::neutral();
        params.jitter = 1.0;
        run(&mut module, &input, &params);
        assert!(module.pulse_faults() > 0);

        let mut light = GlottalModule::new(SR, 3);
        light.configure(&tuning, GlottalMode::Light);
        run(&mut light, &input, &params);
        assert_eq!(light.pulse_faults(), 0);
    }
}
