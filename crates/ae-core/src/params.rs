//! Aberration parameter set
//!
//! One *target* set per archetype (from its profile) plus one *current*
//! (smoothed) set per live voice. Every field is range-validated: values
//! outside their range are clamped and non-finite values fall back to the
//! field's neutral value, so NaN/Inf never reaches a filter.

use serde::{Deserialize, Serialize};

/// Maximum number of formant stages per voice
pub const MAX_FORMANT_BANDS: usize = 5;

/// Minimum number of formant stages per voice
pub const MIN_FORMANT_BANDS: usize = 3;

/// Valid range of one parameter field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    /// Value used when the input is not finite
    pub neutral: f64,
}

impl ParamRange {
    pub const fn new(min: f64, max: f64, neutral: f64) -> Self {
        Self { min, max, neutral }
    }

    /// Clamp a value into range. Returns the value and whether it changed.
    #[inline]
    pub fn clamp(&self, value: f64) -> (f64, bool) {
        if !value.is_finite() {
            return (self.neutral, true);
        }
        let clamped = value.clamp(self.min, self.max);
        (clamped, clamped != value)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

pub const FORMANT_SHIFT_RANGE: ParamRange = ParamRange::new(0.5, 2.0, 1.0);
pub const UNIT_RANGE: ParamRange = ParamRange::new(0.0, 1.0, 0.0);
pub const GAIN_TRIM_RANGE: ParamRange = ParamRange::new(-24.0, 6.0, 0.0);

/// Discrete corporeal noise event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseEventKind {
    /// Short wet click, triggered by signal onsets
    WetClick,
    /// Raspy inhalation, triggered by pauses
    Rasp,
    /// Bone-creak fry, triggered by voiced-to-unvoiced transitions
    Creak,
}

impl NoiseEventKind {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::WetClick, Self::Rasp, Self::Creak];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::WetClick => 0,
            Self::Rasp => 1,
            Self::Creak => 2,
        }
    }
}

/// Parameter set describing one voice target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AberrationParameters {
    /// Formant shift ratio per band (0.5 - 2.0)
    #[serde(default = "default_shifts")]
    pub formant_shift: [f64; MAX_FORMANT_BANDS],
    /// Resonance tension (0 - 1)
    #[serde(default)]
    pub tension: f64,
    /// Aspiration noise mix (0 - 1)
    #[serde(default)]
    pub breathiness: f64,
    /// Glottal pitch-period irregularity (0 - 1)
    #[serde(default)]
    pub jitter: f64,
    /// Glottal amplitude irregularity (0 - 1)
    #[serde(default)]
    pub shimmer: f64,
    /// Sub-octave blend depth (0 - 1)
    #[serde(default)]
    pub subharmonic_depth: f64,
    /// Fraction of time spent in sub-octave bursts (0 - 1)
    #[serde(default)]
    pub subharmonic_duty: f64,
    /// Mix weight per noise event kind (0 - 1), indexed by `NoiseEventKind::index`
    #[serde(default)]
    pub noise_mix: [f64; NoiseEventKind::COUNT],
    /// Master gain trim in dB (-24 - +6)
    #[serde(default)]
    pub gain_trim_db: f64,
}

fn default_shifts() -> [f64; MAX_FORMANT_BANDS] {
    [1.0; MAX_FORMANT_BANDS]
}

impl Default for AberrationParameters {
    fn default() -> Self {
        Self::neutral()
    }
}

impl AberrationParameters {
    /// Identity transform: no shift, no creative layers, unity gain
    pub const fn neutral() -> Self {
        Self {
            formant_shift: [1.0; MAX_FORMANT_BANDS],
            tension: 0.0,
            breathiness: 0.0,
            jitter: 0.0,
            shimmer: 0.0,
            subharmonic_depth: 0.0,
            subharmonic_duty: 0.0,
            noise_mix: [0.0; NoiseEventKind::COUNT],
            gain_trim_db: 0.0,
        }
    }

    /// Clamp every field into range.
    ///
    /// Returns `true` if any field was out of range or non-finite.
    pub fn sanitize(&mut self) -> bool {
        let mut faulted = false;
        let mut fix = |value: &mut f64, range: &ParamRange| {
            let (v, changed) = range.clamp(*value);
            *value = v;
            faulted |= changed;
        };

        for shift in self.formant_shift.iter_mut() {
            fix(shift, &FORMANT_SHIFT_RANGE);
        }
        fix(&mut self.tension, &UNIT_RANGE);
        fix(&mut self.breathiness, &UNIT_RANGE);
        fix(&mut self.jitter, &UNIT_RANGE);
        fix(&mut self.shimmer, &UNIT_RANGE);
        fix(&mut self.subharmonic_depth, &UNIT_RANGE);
        fix(&mut self.subharmonic_duty, &UNIT_RANGE);
        for mix in self.noise_mix.iter_mut() {
            fix(mix, &UNIT_RANGE);
        }
        fix(&mut self.gain_trim_db, &GAIN_TRIM_RANGE);

        faulted
    }

    /// Sanitized copy plus the fault indicator
    pub fn sanitized(mut self) -> (Self, bool) {
        let faulted = self.sanitize();
        (self, faulted)
    }

    /// True if every field is finite and in range
    pub fn is_valid(&self) -> bool {
        let mut copy = *self;
        !copy.sanitize()
    }

    /// Linear blend between two parameter sets (parameter space only)
    pub fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |x: f64, y: f64| x + (y - x) * t;
        let mut out = Self::neutral();
        for i in 0..MAX_FORMANT_BANDS {
            out.formant_shift[i] = mix(a.formant_shift[i], b.formant_shift[i]);
        }
        out.tension = mix(a.tension, b.tension);
        out.breathiness = mix(a.breathiness, b.breathiness);
        out.jitter = mix(a.jitter, b.jitter);
        out.shimmer = mix(a.shimmer, b.shimmer);
        out.subharmonic_depth = mix(a.subharmonic_depth, b.subharmonic_depth);
        out.subharmonic_duty = mix(a.subharmonic_duty, b.subharmonic_duty);
        for i in 0..NoiseEventKind::COUNT {
            out.noise_mix[i] = mix(a.noise_mix[i], b.noise_mix[i]);
        }
        out.gain_trim_db = mix(a.gain_trim_db, b.gain_trim_db);
        out.sanitize();
        out
    }

    /// Noise mix weight for one event kind
    #[inline]
    pub fn noise_weight(&self, kind: NoiseEventKind) -> f64 {
        self.noise_mix[kind.index()]
    }
}
