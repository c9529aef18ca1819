//! Voice instance (audio side)
//!
//! One preallocated slot per pool entry. A voice reads its anchor one block
//! at a time and runs the per-voice chain its tier allows:
//!
//! smoother -> glottal -> formant -> subharmonic -> breath -> noise -> trim -> limiter
//!
//! Far voices skip the chain; the engine mixes their raw anchor block and
//! their current target into a cluster bus instead.

use ae_core::{AberrationParameters, ArchetypeProfile, FaultFlags, FaultKind, Sample, block_is_finite, db_to_gain};
use ae_dsp::breath::BreathLayer;
use ae_dsp::formant::FormantBank;
use ae_dsp::glottal::{GlottalMode, GlottalModule};
use ae_dsp::limiter::SoftLimiter;
use ae_dsp::noise::CorporealNoise;
use ae_dsp::smoothing::{ParameterSmoother, SmootherConfig};
use ae_dsp::subharmonic::SubharmonicGenerator;
use ae_dsp::{Processor, StateHealth};
use ae_realtime::ParamReceiver;
use std::sync::Arc;

use crate::anchor::{AnchorClip, AnchorCursor};
use crate::lod::{LodTier, ProcessingPlan};

const GLOTTAL_SALT: u64 = 0x676C_6F74;
const SUB_SALT: u64 = 0x7375_6268;
const BREATH_SALT: u64 = 0x6272_6561;
const NOISE_SALT: u64 = 0x6E6F_6973;

/// SplitMix64 finaliser; decorrelates per-module streams of one voice seed
#[inline]
pub fn mix_seed(seed: u64, salt: u64) -> u64 {
    let mut z = seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Assets a voice releases when it stops or is restarted
#[derive(Debug, Default)]
pub struct Released {
    pub profile: Option<Arc<ArchetypeProfile>>,
    pub clip: Option<Arc<AnchorClip>>,
}

/// Everything the audio thread needs to start a voice
#[derive(Debug, Clone)]
pub struct VoiceStart {
    pub profile: Arc<ArchetypeProfile>,
    pub clip: Arc<AnchorClip>,
    pub looping: bool,
    pub seed: u64,
    pub tier: LodTier,
    pub initial: AberrationParameters,
}

/// Per-voice processing state
pub struct VoiceInstance {
    sample_rate: f64,
    block_secs: f64,
    active: bool,
    smoother: ParameterSmoother,
    receiver: ParamReceiver<AberrationParameters>,
    target: AberrationParameters,
    glottal: GlottalModule,
    formant: FormantBank,
    subharmonic: SubharmonicGenerator,
    breath: BreathLayer,
    noise: CorporealNoise,
    limiter: SoftLimiter,
    gain: f64,
    dry: Vec<Sample>,
    out: Vec<Sample>,
    profile: Option<Arc<ArchetypeProfile>>,
    cursor: AnchorCursor,
    tier: LodTier,
    plan: ProcessingPlan,
    faults: FaultFlags,
}

impl VoiceInstance {
    pub fn new(
        sample_rate: f64,
        block_size: usize,
        smoothing: SmootherConfig,
        receiver: ParamReceiver<AberrationParameters>,
    ) -> Self {
        Self {
            sample_rate,
            block_secs: block_size as f64 / sample_rate,
            active: false,
            smoother: ParameterSmoother::new(smoothing),
            receiver,
            target: AberrationParameters::neutral(),
            glottal: GlottalModule::new(sample_rate, 0),
            formant: FormantBank::new(&[], sample_rate),
            subharmonic: SubharmonicGenerator::new(sample_rate, 0),
            breath: BreathLayer::new(sample_rate, 0),
            noise: CorporealNoise::new(sample_rate, 0),
            limiter: SoftLimiter::default(),
            gain: 1.0,
            dry: vec![0.0; block_size],
            out: vec![0.0; block_size],
            profile: None,
            cursor: AnchorCursor::default(),
            tier: LodTier::Far,
            plan: ProcessingPlan::FAR,
            faults: FaultFlags::NONE,
        }
    }

    /// Bind the voice to a profile and anchor; every state starts from zero
    pub fn start(&mut self, start: VoiceStart) -> Released {
        let released = self.stop();
        let VoiceStart {
            profile,
            clip,
            looping,
            seed,
            tier,
            initial,
        } = start;

        self.formant.set_layout(&profile.formants);
        self.glottal.configure(&profile.glottal, GlottalMode::Off);
        self.subharmonic.configure(&profile.subharmonic);
        self.noise.configure(&profile.noise_events);

        self.glottal.reseed(mix_seed(seed, GLOTTAL_SALT));
        self.subharmonic.reseed(mix_seed(seed, SUB_SALT));
        self.breath.reseed(mix_seed(seed, BREATH_SALT));
        self.noise.reseed(mix_seed(seed, NOISE_SALT));

        let (initial, _) = initial.sanitized();
        self.target = initial;
        self.smoother.set_immediate(initial);
        self.formant.update(&initial);
        self.gain = db_to_gain(initial.gain_trim_db);

        let plan = ProcessingPlan::resolve(&profile.modules, tier);
        self.apply_plan(tier, plan);

        self.cursor.attach(clip, looping);
        self.profile = Some(profile);
        self.active = true;
        released
    }

    /// Release assets and zero every state
    pub fn stop(&mut self) -> Released {
        self.active = false;
        self.reset_modules();
        self.smoother.reset();
        self.target = AberrationParameters::neutral();
        self.gain = 1.0;
        self.dry.fill(0.0);
        self.out.fill(0.0);
        self.tier = LodTier::Far;
        self.plan = ProcessingPlan::FAR;
        Released {
            profile: self.profile.take(),
            clip: self.cursor.detach(),
        }
    }

    fn reset_modules(&mut self) {
        self.glottal.reset();
        self.formant.reset();
        self.subharmonic.reset();
        self.breath.reset();
        self.noise.reset();
    }

    fn apply_plan(&mut self, tier: LodTier, plan: ProcessingPlan) {
        self.glottal.set_mode(plan.glottal);
        self.formant.set_stage_limit(plan.formant_stages);
        self.tier = tier;
        self.plan = plan;
    }

    /// Move to another tier; modules coming back online start from zero state
    pub fn set_tier(&mut self, tier: LodTier) {
        if !self.active || tier == self.tier {
            return;
        }
        let Some(profile) = &self.profile else {
            return;
        };
        let plan = ProcessingPlan::resolve(&profile.modules, tier);
        let old = self.plan;

        if !old.per_voice && plan.per_voice {
            // Promoted out of Far: state is arbitrarily stale
            self.reset_modules();
            self.smoother.set_immediate(self.target);
            self.formant.update(&self.target);
            self.gain = db_to_gain(self.target.gain_trim_db);
        } else {
            if old.glottal == GlottalMode::Off && plan.glottal != GlottalMode::Off {
                self.glottal.reset();
            }
            if !old.subharmonic && plan.subharmonic {
                self.subharmonic.reset();
            }
            if !old.breath && plan.breath {
                self.breath.reset();
            }
            if !old.noise && plan.noise {
                self.noise.reset();
            }
        }
        self.apply_plan(tier, plan);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn tier(&self) -> LodTier {
        self.tier
    }

    pub fn plan(&self) -> &ProcessingPlan {
        &self.plan
    }

    pub fn profile(&self) -> Option<&Arc<ArchetypeProfile>> {
        self.profile.as_ref()
    }

    /// True once a non-looping anchor has been read to the end
    pub fn is_finished(&self) -> bool {
        self.cursor.is_finished()
    }

    /// Smoothed parameters of the last block
    pub fn current(&self) -> &AberrationParameters {
        self.smoother.current()
    }

    pub fn target(&self) -> &AberrationParameters {
        &self.target
    }

    pub fn output(&self) -> &[Sample] {
        &self.out
    }

    /// Raw anchor block read by the last `process` or `read_anchor`
    pub fn dry(&self) -> &[Sample] {
        &self.dry
    }

    pub fn formant(&self) -> &FormantBank {
        &self.formant
    }

    pub fn formant_mut(&mut self) -> &mut FormantBank {
        &mut self.formant
    }

    pub fn glottal(&self) -> &GlottalModule {
        &self.glottal
    }

    pub fn subharmonic(&self) -> &SubharmonicGenerator {
        &self.subharmonic
    }

    pub fn noise(&self) -> &CorporealNoise {
        &self.noise
    }

    /// Faults raised since the last call
    pub fn take_faults(&mut self) -> FaultFlags {
        self.faults.take()
    }

    /// Pick up a newly published target, clamping it
    fn receive_target(&mut self) {
        if let Some(published) = self.receiver.latest() {
            let (target, clamped) = published.sanitized();
            if clamped {
                self.faults.raise(FaultKind::ParameterRange);
            }
            self.target = target;
        }
    }

    /// Advance a Far voice: read its anchor for the cluster bus
    pub fn read_anchor(&mut self) -> &[Sample] {
        self.receive_target();
        self.cursor.read_block(&mut self.dry);
        &self.dry
    }

    /// Run one block of the per-voice chain into `output()`
    pub fn process(&mut self) {
        if !self.active || !self.plan.per_voice {
            self.out.fill(0.0);
            return;
        }
        self.receive_target();
        let params = *self.smoother.advance(&self.target, self.block_secs);
        self.formant.update(&params);

        self.cursor.read_block(&mut self.dry);
        self.out.copy_from_slice(&self.dry);

        let plan = self.plan;
        let mut health = self.glottal.process_block(&mut self.out, &params);
        health = health.merge(self.formant.process_block(&mut self.out));
        if plan.subharmonic {
            health = health.merge(self.subharmonic.process_block(&mut self.out, &params));
        }
        if plan.breath {
            health = health.merge(self.breath.process_block(&mut self.out, &params));
        }
        if plan.noise {
            health = health.merge(self.noise.process_block(&mut self.out, &self.dry, &params));
        }

        let target_gain = db_to_gain(params.gain_trim_db);
        let step = (target_gain - self.gain) / self.out.len().max(1) as f64;
        for s in self.out.iter_mut() {
            self.gain += step;
            *s = self.limiter.process(*s * self.gain);
        }
        self.gain = target_gain;

        if !block_is_finite(&self.out) {
            self.reset_modules();
            health = StateHealth::Recovered;
        }
        if health.is_recovered() {
            self.faults.raise(FaultKind::FilterState);
            self.out.fill(0.0);
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
