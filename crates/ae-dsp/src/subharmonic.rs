//! Subharmonic Generator
//!
//! Octave divider: the lowpassed anchor drives a flip-flop that toggles on
//! every positive zero crossing; the flip-flop times the lowpassed signal and
//! the product is lowpassed again, leaving a copy one octave down.
//!
//! The sub-octave is blended in intermittent bursts. A four-phase state
//! machine (quiet, rising, sustained, falling) advances per sample; quiet gaps
//! are drawn from the duty cycle so bursts cover roughly `duty` of the time.

use ae_core::{AberrationParameters, BurstTiming, Sample, block_is_finite};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::svf::{SvfMode, SvfParams, TptSvf};
use crate::{Processor, StateHealth};

const INPUT_LOWPASS_HZ: f64 = 400.0;
const OUTPUT_LOWPASS_HZ: f64 = 250.0;
const FLIP_HYSTERESIS: f64 = 0.002;
/// Sub-octave level relative to the lowpassed fundamental
const SUB_GAIN: f64 = 1.5;

/// Burst state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BurstPhase {
    Quiet,
    Rising,
    Sustained,
    Falling,
}

impl BurstPhase {
    pub const COUNT: usize = 4;

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Quiet => 0,
            Self::Rising => 1,
            Self::Sustained => 2,
            Self::Falling => 3,
        }
    }
}

/// Per-voice sub-octave burst generator
#[derive(Debug, Clone)]
pub struct SubharmonicGenerator {
    sample_rate: f64,
    timing: BurstTiming,
    input_lp: TptSvf,
    output_lp: TptSvf,
    flip: f64,
    armed: bool,
    rng: ChaCha8Rng,
    phase: BurstPhase,
    envelope: f64,
    /// Samples left in the current quiet gap or sustain
    remaining: f64,
    bursts_completed: u64,
    phase_entries: [u64; BurstPhase::COUNT],
}

impl SubharmonicGenerator {
    pub fn new(sample_rate: f64, seed: u64) -> Self {
        Self {
            sample_rate,
            timing: BurstTiming::default(),
            input_lp: TptSvf::with_params(
                SvfMode::Lowpass,
                SvfParams::new(INPUT_LOWPASS_HZ, std::f64::consts::FRAC_1_SQRT_2),
                sample_rate,
            ),
            output_lp: TptSvf::with_params(
                SvfMode::Lowpass,
                SvfParams::new(OUTPUT_LOWPASS_HZ, std::f64::consts::FRAC_1_SQRT_2),
                sample_rate,
            ),
            flip: 1.0,
            armed: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
            phase: BurstPhase::Quiet,
            envelope: 0.0,
            remaining: f64::INFINITY,
            bursts_completed: 0,
            phase_entries: [0; BurstPhase::COUNT],
        }
    }

    pub fn configure(&mut self, timing: &BurstTiming) {
        self.timing = *timing;
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    #[inline]
    pub fn phase(&self) -> BurstPhase {
        self.phase
    }

    #[inline]
    pub fn envelope(&self) -> f64 {
        self.envelope
    }

    pub fn bursts_completed(&self) -> u64 {
        self.bursts_completed
    }

    /// How many times a phase has been entered
    pub fn phase_entries(&self, phase: BurstPhase) -> u64 {
        self.phase_entries[phase.index()]
    }

    #[inline]
    fn ms_to_samples(&self, ms: f64) -> f64 {
        (ms * 0.001 * self.sample_rate).max(1.0)
    }

    fn enter(&mut self, phase: BurstPhase) {
        self.phase = phase;
        self.phase_entries[phase.index()] += 1;
    }

    fn draw_gap(&mut self, duty: f64) -> f64 {
        let burst = self.ms_to_samples(self.timing.mean_burst_ms());
        let mean_gap = burst * (1.0 - duty) / duty;
        mean_gap * self.rng.random_range(0.5..=1.5)
    }

    fn draw_sustain(&mut self) -> f64 {
        let lo = self.timing.sustain_min_ms.max(0.0);
        let hi = self.timing.sustain_max_ms.max(lo);
        let ms = if hi > lo { self.rng.random_range(lo..=hi) } else { lo };
        self.ms_to_samples(ms)
    }

    /// Advance the burst state machine by one sample
    #[inline]
    fn step_envelope(&mut self, depth: f64, duty: f64) {
        let enabled = depth > 0.0 && duty > 0.0;
        match self.phase {
            BurstPhase::Quiet => {
                self.envelope = 0.0;
                if !enabled {
                    return;
                }
                if !self.remaining.is_finite() {
                    self.remaining = self.draw_gap(duty);
                }
                self.remaining -= 1.0;
                if self.remaining <= 0.0 {
                    self.enter(BurstPhase::Rising);
                }
            }
            BurstPhase::Rising => {
                if !enabled {
                    self.enter(BurstPhase::Falling);
                    return;
                }
                self.envelope += 1.0 / self.ms_to_samples(self.timing.rise_ms);
                if self.envelope >= 1.0 {
                    self.envelope = 1.0;
                    self.remaining = self.draw_sustain();
                    self.enter(BurstPhase::Sustained);
                }
            }
            BurstPhase::Sustained => {
                self.remaining -= 1.0;
                if !enabled || self.remaining <= 0.0 {
                    self.enter(BurstPhase::Falling);
                }
            }
            BurstPhase::Falling => {
                self.envelope -= 1.0 / self.ms_to_samples(self.timing.fall_ms);
                if self.envelope <= 0.0 {
                    self.envelope = 0.0;
                    self.bursts_completed += 1;
                    self.remaining = if enabled { self.draw_gap(duty) } else { f64::INFINITY };
                    self.enter(BurstPhase::Quiet);
                }
            }
        }
    }

    /// Process a block in place
    pub fn process_block(&mut self, block: &mut [Sample], params: &AberrationParameters) -> StateHealth {
        let depth = params.subharmonic_depth;
        let duty = params.subharmonic_duty;

        for sample in block.iter_mut() {
            let x = *sample;
            let low = self.input_lp.process(x);
            if low < -FLIP_HYSTERESIS {
                self.armed = true;
            } else if self.armed && low > FLIP_HYSTERESIS {
                self.armed = false;
                self.flip = -self.flip;
            }
            let sub = self.output_lp.process(low * self.flip);

            self.step_envelope(depth, duty);
            *sample = x + SUB_GAIN * depth * self.envelope * sub;
        }

        let health = self
            .input_lp
            .check_state(block)
            .merge(self.output_lp.check_state(block));
        if health.is_recovered() || !block_is_finite(block) {
            self.input_lp.reset();
            self.output_lp.reset();
            block.fill(0.0);
            return StateHealth::Recovered;
        }
        health
    }
}

impl Processor for SubharmonicGenerator {
    fn reset(&mut self) {
        self.input_lp.reset();
        self.output_lp.reset();
        self.flip = 1.0;
        self.armed = false;
        self.phase = BurstPhase::Quiet;
        self.envelope = 0.0;
        self.remaining = f64::INFINITY;
        self.bursts_completed = 0;
        self.phase_entries = [0; BurstPhase::COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SR: f64 = 48000.0;

    fn params(depth: f64, duty: f64) -> AberrationParameters {
        let mut p = AberrationParameters::neutral();
        p.subharmonic_depth = depth;
        p.subharmonic_duty = duty;
        p
    }

    fn tone(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * 110.0 * i as f64 / SR).sin())
            .collect()
    }

    #[test]
    fn test_zero_duty_never_leaves_quiet() {
        let mut sub = SubharmonicGenerator::new(SR, 5);
        let input = tone(SR as usize * 5);
        let mut out = input.clone();
        for chunk in out.chunks_mut(256) {
            sub.process_block(chunk, &params(1.0, 0.0));
        }
        assert_eq!(sub.phase(), BurstPhase::Quiet);
        assert_eq!(sub.phase_entries(BurstPhase::Rising), 0);
        assert_eq!(out, input);
    }

    #[test]
    fn test_bursts_cycle_and_quiet_envelope_is_zero() {
        let mut sub = SubharmonicGenerator::new(SR, 17);
        let p = params(0.8, 0.4);
        let mut block = [0.0; 256];
        let input = tone(SR as usize * 10);

        for chunk in input.chunks(256) {
            block[..chunk.len()].copy_from_slice(chunk);
            sub.process_block(&mut block[..chunk.len()], &p);
            if sub.phase() == BurstPhase::Quiet {
                assert_eq!(sub.envelope(), 0.0);
            }
        }
        assert!(sub.bursts_completed() >= 1);
        assert!(sub.phase_entries(BurstPhase::Sustained) >= sub.bursts_completed());
    }

    #[test]
    fn test_burst_adds_sub_octave_energy() {
        let mut sub = SubharmonicGenerator::new(SR, 1);
        sub.configure(&BurstTiming {
            rise_ms: 10.0,
            sustain_min_ms: 5000.0,
            sustain_max_ms: 5000.0,
            fall_ms: 10.0,
        });
        let input = tone(SR as usize * 4);
        let mut out = input.clone();
        for chunk in out.chunks_mut(256) {
            sub.process_block(chunk, &params(1.0, 0.99));
        }
        assert_eq!(sub.phase(), BurstPhase::Sustained);

        // Correlate the difference with a 55 Hz reference sine over the last second
        let start = input.len() - SR as usize;
        let (mut re, mut im) = (0.0, 0.0);
        for i in start..input.len() {
            let d = out[i] - input[i];
            let w = 2.0 * PI * 55.0 * i as f64 / SR;
            re += d * w.cos();
            im += d * w.sin();
        }
        let magnitude = (re * re + im * im).sqrt() / SR;
        assert!(magnitude > 0.01, "55 Hz magnitude {}", magnitude);
    }

    #[test]
    fn test_same_seed_same_bursts() {
        let run = |seed| {
            let mut sub = SubharmonicGenerator::new(SR, seed);
            let mut out = tone(SR as usize * 6);
            for chunk in out.chunks_mut(256) {
                sub.process_block(chunk, &params(0.7, 0.5));
            }
            (sub.bursts_completed(), out)
        };
        assert_eq!(run(42), run(42));
    }
}
