//! Far-tier cluster buses
//!
//! Far voices share one coarse formant cascade per (archetype, direction)
//! cluster. Members are summed raw, normalised by `1/sqrt(n)` and shaped
//! once per block. The bus heads for the mean of its members' targets, so
//! emotion still reaches Far voices, just averaged over the cluster.

use ae_core::{AberrationParameters, ArchetypeProfile, Sample, block_is_finite, db_to_gain};
use ae_dsp::formant::{COARSE_STAGES, FormantBank};
use ae_dsp::limiter::SoftLimiter;
use ae_dsp::smoothing::{ParameterSmoother, SmootherConfig};
use ae_dsp::{Processor, StateHealth};
use std::sync::Arc;

/// One shared Far-tier processing lane
pub struct ClusterBus {
    block_secs: f64,
    profile: Option<Arc<ArchetypeProfile>>,
    smoother: ParameterSmoother,
    formant: FormantBank,
    limiter: SoftLimiter,
    input: Vec<Sample>,
    out: Vec<Sample>,
    members: usize,
    blend: AberrationParameters,
}

impl ClusterBus {
    pub fn new(sample_rate: f64, block_size: usize, smoothing: SmootherConfig) -> Self {
        let mut formant = FormantBank::new(&[], sample_rate);
        formant.set_stage_limit(COARSE_STAGES);
        Self {
            block_secs: block_size as f64 / sample_rate,
            profile: None,
            smoother: ParameterSmoother::new(smoothing),
            formant,
            limiter: SoftLimiter::default(),
            input: vec![0.0; block_size],
            out: vec![0.0; block_size],
            members: 0,
            blend: AberrationParameters::neutral(),
        }
    }

    /// Claim the bus for an archetype.
    ///
    /// Returns the `Arc` the caller must retire: the previous profile, or the
    /// argument itself when the bus already holds it.
    pub fn configure(&mut self, profile: Arc<ArchetypeProfile>) -> Option<Arc<ArchetypeProfile>> {
        let same = self.profile.as_ref().is_some_and(|p| Arc::ptr_eq(p, &profile));
        if same {
            return Some(profile);
        }
        self.formant.set_layout(&profile.formants);
        self.formant.set_stage_limit(COARSE_STAGES);
        self.smoother.set_immediate(profile.target);
        self.formant.update(&profile.target);
        self.profile.replace(profile)
    }

    pub fn profile(&self) -> Option<&Arc<ArchetypeProfile>> {
        self.profile.as_ref()
    }

    /// Start a new block
    pub fn clear(&mut self) {
        self.input.fill(0.0);
        self.members = 0;
    }

    /// Sum one member's anchor block and fold its target into the running mean
    pub fn add(&mut self, block: &[Sample], target: &AberrationParameters) {
        for (acc, &x) in self.input.iter_mut().zip(block) {
            *acc += x;
        }
        self.members += 1;
        self.blend = if self.members == 1 {
            *target
        } else {
            AberrationParameters::lerp(&self.blend, target, 1.0 / self.members as f64)
        };
    }

    /// Target the bus heads for this block: member mean, or the profile's
    /// own target while the bus has no members
    pub fn target(&self) -> Option<AberrationParameters> {
        let profile = self.profile.as_ref()?;
        Some(if self.members > 0 { self.blend } else { profile.target })
    }

    /// Smoothed parameters of the last block
    pub fn current(&self) -> &AberrationParameters {
        self.smoother.current()
    }

    /// Members mixed since the last `clear`
    pub fn members(&self) -> usize {
        self.members
    }

    /// Shape the summed members into `output()`
    pub fn process(&mut self) -> StateHealth {
        let Some(target) = self.target() else {
            self.out.fill(0.0);
            return StateHealth::Healthy;
        };
        if self.members == 0 {
            // No members this block; the cascade still rings out
            self.out.fill(0.0);
        } else {
            let norm = 1.0 / (self.members as f64).sqrt();
            for (o, &x) in self.out.iter_mut().zip(&self.input) {
                *o = x * norm;
            }
        }

        let params = *self.smoother.advance(&target, self.block_secs);
        self.formant.update(&params);
        let mut health = self.formant.process_block(&mut self.out);

        let gain = db_to_gain(params.gain_trim_db);
        for s in self.out.iter_mut() {
            *s = self.limiter.process(*s * gain);
        }
        if !block_is_finite(&self.out) {
            self.formant.reset();
            health = StateHealth::Recovered;
        }
        if health.is_recovered() {
            self.out.fill(0.0);
        }
        health
    }

    pub fn output(&self) -> &[Sample] {
        &self.out
    }

    pub fn formant_mut(&mut self) -> &mut FormantBank {
        &mut self.formant
    }

    /// Release the profile and zero every state
    pub fn release(&mut self) -> Option<Arc<ArchetypeProfile>> {
        self.clear();
        self.formant.reset();
        self.smoother.reset();
        self.out.fill(0.0);
        self.profile.take()
    }
}
