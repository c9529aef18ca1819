//! Breath layer
//!
//! Aspiration noise shaped by the anchor's envelope and highpassed, mixed
//! in proportion to `breathiness`.

use ae_core::{AberrationParameters, Sample, block_is_finite};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::analysis::EnvelopeFollower;
use crate::svf::{SvfMode, SvfParams, TptSvf};
use crate::{Processor, StateHealth};

const AIR_HIGHPASS_HZ: f64 = 1800.0;
/// Noise level relative to the anchor envelope at breathiness = 1
const BREATH_GAIN: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct BreathLayer {
    follower: EnvelopeFollower,
    air: TptSvf,
    rng: ChaCha8Rng,
}

impl BreathLayer {
    pub fn new(sample_rate: f64, seed: u64) -> Self {
        Self {
            follower: EnvelopeFollower::new(5.0, 60.0, sample_rate),
            air: TptSvf::with_params(SvfMode::Highpass, SvfParams::new(AIR_HIGHPASS_HZ, 0.7), sample_rate),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn process_block(&mut self, block: &mut [Sample], params: &AberrationParameters) -> StateHealth {
        let amount = params.breathiness * BREATH_GAIN;
        if amount <= 0.0 {
            // Keep the follower warm so breath fades in from the right level
            for &x in block.iter() {
                self.follower.process(x);
            }
            return StateHealth::Healthy;
        }

        for sample in block.iter_mut() {
            let env = self.follower.process(*sample);
            let white: f64 = self.rng.random_range(-1.0..1.0);
            let air = self.air.process(white);
            *sample += amount * env * air;
        }

        let health = self.air.check_state(block);
        if health.is_recovered() || !block_is_finite(block) {
            self.reset();
            block.fill(0.0);
            return StateHealth::Recovered;
        }
        health
    }
}

impl Processor for BreathLayer {
    fn reset(&mut self) {
        self.follower.reset();
        self.air.reset();
    }
}
