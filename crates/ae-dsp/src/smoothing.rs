//! Parameter Smoothing
//!
//! Moves a voice's *current* parameters toward its *target* with one-pole
//! exponential smoothing, once per block. Filters derive their coefficients
//! from the smoothed parameters afterwards; coefficients themselves are never
//! smoothed (a blend of two stable coefficient sets is not necessarily stable).
//!
//! Time constants are in seconds, so results are independent of sample rate
//! and block size: `c = 1 - exp(-dt / tau)`.

use ae_core::{AberrationParameters, MAX_FORMANT_BANDS, NoiseEventKind};
use serde::{Deserialize, Serialize};

/// Minimum smoothing time constant in milliseconds
pub const MIN_SMOOTH_TIME_MS: f64 = 2.0;

/// Maximum smoothing time constant in milliseconds
pub const MAX_SMOOTH_TIME_MS: f64 = 10.0;

/// Parameter classes sharing a time constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingClass {
    /// Formant shifts and jitter: slower, audible-but-natural glide
    Pitch,
    /// Tension, breath, shimmer, subharmonic and noise mix
    Timbre,
    /// Gain trim: fast, so gain never audibly lags
    Gain,
}

/// Time constants per parameter class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmootherConfig {
    #[serde(default = "default_pitch_ms")]
    pub pitch_ms: f64,
    #[serde(default = "default_timbre_ms")]
    pub timbre_ms: f64,
    #[serde(default = "default_gain_ms")]
    pub gain_ms: f64,
}

fn default_pitch_ms() -> f64 {
    8.0
}
fn default_timbre_ms() -> f64 {
    5.0
}
fn default_gain_ms() -> f64 {
    3.0
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            pitch_ms: 8.0,
            timbre_ms: 5.0,
            gain_ms: 3.0,
        }
    }
}

impl SmootherConfig {
    /// Time constant for a class, clamped to the supported range (ms)
    pub fn time_ms(&self, class: SmoothingClass) -> f64 {
        let ms = match class {
            SmoothingClass::Pitch => self.pitch_ms,
            SmoothingClass::Timbre => self.timbre_ms,
            SmoothingClass::Gain => self.gain_ms,
        };
        if ms.is_finite() {
            ms.clamp(MIN_SMOOTH_TIME_MS, MAX_SMOOTH_TIME_MS)
        } else {
            MAX_SMOOTH_TIME_MS
        }
    }

    /// One-pole coefficient for a class over an interval of `dt` seconds
    #[inline]
    pub fn coeff(&self, class: SmoothingClass, dt: f64) -> f64 {
        if !(dt.is_finite() && dt > 0.0) {
            return 0.0;
        }
        let tau = self.time_ms(class) / 1000.0;
        1.0 - (-dt / tau).exp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ClassCoeffs {
    pitch: f64,
    timbre: f64,
    gain: f64,
}

impl ClassCoeffs {
    fn new(config: &SmootherConfig, dt: f64) -> Self {
        Self {
            pitch: config.coeff(SmoothingClass::Pitch, dt),
            timbre: config.coeff(SmoothingClass::Timbre, dt),
            gain: config.coeff(SmoothingClass::Gain, dt),
        }
    }
}

#[inline]
fn approach(current: f64, target: f64, c: f64) -> f64 {
    current + c * (target - current)
}

fn step(target: &AberrationParameters, current: &AberrationParameters, c: &ClassCoeffs) -> AberrationParameters {
    let mut next = *current;

    // Formant shifts glide in log2 space so up- and down-shifts sound symmetric
    for i in 0..MAX_FORMANT_BANDS {
        let from = current.formant_shift[i].max(f64::MIN_POSITIVE).log2();
        let to = target.formant_shift[i].max(f64::MIN_POSITIVE).log2();
        next.formant_shift[i] = approach(from, to, c.pitch).exp2();
    }
    next.jitter = approach(current.jitter, target.jitter, c.pitch);

    next.tension = approach(current.tension, target.tension, c.timbre);
    next.breathiness = approach(current.breathiness, target.breathiness, c.timbre);
    next.shimmer = approach(current.shimmer, target.shimmer, c.timbre);
    next.subharmonic_depth = approach(current.subharmonic_depth, target.subharmonic_depth, c.timbre);
    next.subharmonic_duty = approach(current.subharmonic_duty, target.subharmonic_duty, c.timbre);
    for i in 0..NoiseEventKind::COUNT {
        next.noise_mix[i] = approach(current.noise_mix[i], target.noise_mix[i], c.timbre);
    }

    next.gain_trim_db = approach(current.gain_trim_db, target.gain_trim_db, c.gain);

    next.sanitize();
    next
}

/// One smoothing step: `advance(target, current, dt) -> current'`
pub fn smooth_step(
    target: &AberrationParameters,
    current: &AberrationParameters,
    dt: f64,
    config: &SmootherConfig,
) -> AberrationParameters {
    step(target, current, &ClassCoeffs::new(config, dt))
}

/// Per-voice parameter smoother
#[derive(Debug, Clone)]
pub struct ParameterSmoother {
    config: SmootherConfig,
    current: AberrationParameters,
    cached_dt: f64,
    cached: ClassCoeffs,
}

impl ParameterSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            config,
            current: AberrationParameters::neutral(),
            cached_dt: 0.0,
            cached: ClassCoeffs::new(&config, 0.0),
        }
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    /// Current smoothed snapshot
    #[inline]
    pub fn current(&self) -> &AberrationParameters {
        &self.current
    }

    /// Jump straight to a value (voice start)
    pub fn set_immediate(&mut self, value: AberrationParameters) {
        let (value, _) = value.sanitized();
        self.current = value;
    }

    /// Advance one interval of `dt` seconds toward `target`
    #[inline]
    pub fn advance(&mut self, target: &AberrationParameters, dt: f64) -> &AberrationParameters {
        if dt != self.cached_dt {
            self.cached_dt = dt;
            self.cached = ClassCoeffs::new(&self.config, dt);
        }
        self.current = step(target, &self.current, &self.cached);
        &self.current
    }

    /// Reset to neutral
    pub fn reset(&mut self) {
        self.current = AberrationParameters::neutral();
    }
}
