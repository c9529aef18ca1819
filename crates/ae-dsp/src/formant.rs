//! Formant Filter Bank
//!
//! 3-5 peak-mode TPT/SVF stages in series, one per archetype formant. Every
//! block the stage coefficients are designed from the *smoothed* parameter
//! snapshot (`design_stages`); the bank never blends coefficient sets.
//!
//! Each stage carries a makeup gain that backs off half of its boost so that
//! stacked resonances don't pile up level; a soft limiter closes the cascade.

use ae_core::{AberrationParameters, FormantBand, MAX_FORMANT_BANDS, MIN_FORMANT_BANDS, Sample, db_to_gain};

use crate::limiter::SoftLimiter;
use crate::svf::{SvfCoeffs, SvfMode, SvfParams, TptSvf};
use crate::{Processor, StateHealth};

/// Stages used by coarse (cluster bus) processing
pub const COARSE_STAGES: usize = 3;

/// Coefficients and makeup gains for one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageDesign {
    pub coeffs: [SvfCoeffs; MAX_FORMANT_BANDS],
    /// Linear makeup gain applied after each stage
    pub makeup: [f64; MAX_FORMANT_BANDS],
    pub count: usize,
}

impl Default for StageDesign {
    fn default() -> Self {
        Self {
            coeffs: [SvfCoeffs::identity(); MAX_FORMANT_BANDS],
            makeup: [1.0; MAX_FORMANT_BANDS],
            count: 0,
        }
    }
}

/// Musical parameters of one stage for a parameter snapshot
#[inline]
pub fn stage_params(band: &FormantBand, shift: f64, tension: f64) -> SvfParams {
    SvfParams {
        cutoff_hz: band.center_hz * shift,
        q: band.q * (0.5 + 1.5 * tension),
        gain_db: band.gain_db * (0.5 + tension),
    }
}

/// Design every stage from a parameter snapshot.
///
/// Pure function of its inputs: the same snapshot always yields the same
/// coefficients, whatever the previous block used.
pub fn design_stages(params: &AberrationParameters, layout: &[FormantBand], sample_rate: f64) -> StageDesign {
    let mut design = StageDesign::default();
    let count = layout.len().min(MAX_FORMANT_BANDS);
    for (i, band) in layout.iter().take(count).enumerate() {
        let p = stage_params(band, params.formant_shift[i], params.tension).clamped(sample_rate);
        design.coeffs[i] = SvfCoeffs::design(SvfMode::Peak, &p, sample_rate);
        design.makeup[i] = db_to_gain(-0.5 * p.gain_db.max(0.0));
    }
    design.count = count;
    design
}

/// Cascade of formant resonators
#[derive(Debug, Clone)]
pub struct FormantBank {
    stages: [TptSvf; MAX_FORMANT_BANDS],
    layout: [FormantBand; MAX_FORMANT_BANDS],
    bands: usize,
    stage_limit: usize,
    params: AberrationParameters,
    design: StageDesign,
    limiter: SoftLimiter,
    sample_rate: f64,
}

impl FormantBank {
    pub fn new(layout: &[FormantBand], sample_rate: f64) -> Self {
        let mut bank = Self {
            stages: std::array::from_fn(|_| TptSvf::new(SvfMode::Peak, sample_rate)),
            layout: [FormantBand::new(1000.0, 1.0, 0.0); MAX_FORMANT_BANDS],
            bands: 0,
            stage_limit: MAX_FORMANT_BANDS,
            params: AberrationParameters::neutral(),
            design: StageDesign::default(),
            limiter: SoftLimiter::default(),
            sample_rate,
        };
        bank.set_layout(layout);
        bank
    }

    /// Install a new formant layout (voice (re)assignment); resets state
    pub fn set_layout(&mut self, layout: &[FormantBand]) {
        let n = layout.len().min(MAX_FORMANT_BANDS);
        self.layout[..n].copy_from_slice(&layout[..n]);
        self.bands = n;
        self.reset();
        self.update(&AberrationParameters::neutral());
    }

    /// Run only the first `limit` stages (at least `MIN_FORMANT_BANDS`)
    pub fn set_stage_limit(&mut self, limit: usize) {
        self.stage_limit = limit.clamp(MIN_FORMANT_BANDS, MAX_FORMANT_BANDS);
        let params = self.params;
        self.update(&params);
    }

    pub fn stage_limit(&self) -> usize {
        self.stage_limit
    }

    /// Number of stages actually processed
    #[inline]
    pub fn active_stages(&self) -> usize {
        self.bands.min(self.stage_limit)
    }

    pub fn layout(&self) -> &[FormantBand] {
        &self.layout[..self.bands]
    }

    /// Redesign stage coefficients from the smoothed snapshot
    pub fn update(&mut self, params: &AberrationParameters) {
        self.params = *params;
        let active = self.active_stages();
        self.design = design_stages(params, &self.layout[..active], self.sample_rate);
        for (stage, coeffs) in self.stages.iter_mut().zip(self.design.coeffs.iter()) {
            stage.set_coeffs(*coeffs);
        }
    }

    /// Coefficients currently installed in the active stages
    pub fn design(&self) -> &StageDesign {
        &self.design
    }

    pub fn coeffs(&self) -> &[SvfCoeffs] {
        &self.design.coeffs[..self.design.count]
    }

    pub fn stage(&self, index: usize) -> Option<&TptSvf> {
        self.stages.get(index)
    }

    pub fn stage_mut(&mut self, index: usize) -> Option<&mut TptSvf> {
        self.stages.get_mut(index)
    }

    /// Process a block in place through all active stages and the limiter
    pub fn process_block(&mut self, block: &mut [Sample]) -> StateHealth {
        let mut health = StateHealth::Healthy;
        for i in 0..self.design.count {
            let makeup = self.design.makeup[i];
            let stage = &mut self.stages[i];
            for s in block.iter_mut() {
                *s = stage.process(*s) * makeup;
            }
            health = health.merge(stage.check_state(block));
        }
        if health.is_recovered() {
            // A stage was corrupted: zero the whole cascade, not just the culprit
            for stage in self.stages.iter_mut() {
                stage.reset();
            }
            block.fill(0.0);
        }
        self.limiter.process_slice(block);
        health
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        for stage in self.stages.iter_mut() {
            stage.set_sample_rate(sample_rate);
        }
        self.reset();
    }
}

impl Processor for FormantBank {
    fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }
}
