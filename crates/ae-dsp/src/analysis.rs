//! Signal analysis
//!
//! Lightweight, allocation-free trackers run on the anchor signal:
//! - `EnvelopeFollower` - attack/release peak envelope
//! - `ZeroCrossingPitch` - pitch period from positive zero crossings
//! - `FeatureDetector` - per-block onset / pause / unvoiced detection
//!
//! `period_jitter` is an offline measurement helper (diagnostics and tests).

use ae_core::{Sample, gain_to_db};

// ═══════════════════════════════════════════════════════════════════════════════
// ENVELOPE FOLLOWER
// ═══════════════════════════════════════════════════════════════════════════════

/// One-pole attack/release envelope follower
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack: f64,
    release: f64,
    env: f64,
}

impl EnvelopeFollower {
    pub fn new(attack_ms: f64, release_ms: f64, sample_rate: f64) -> Self {
        let coeff = |ms: f64| {
            let samples = (ms * 0.001 * sample_rate).max(1.0);
            1.0 - (-1.0 / samples).exp()
        };
        Self {
            attack: coeff(attack_ms),
            release: coeff(release_ms),
            env: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x: Sample) -> f64 {
        let mag = x.abs();
        let c = if mag > self.env { self.attack } else { self.release };
        self.env += c * (mag - self.env);
        if !self.env.is_finite() {
            self.env = 0.0;
        }
        self.env
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.env
    }

    pub fn reset(&mut self) {
        self.env = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PITCH TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Lowest tracked fundamental
pub const MIN_PITCH_HZ: f64 = 60.0;
/// Highest tracked fundamental
pub const MAX_PITCH_HZ: f64 = 400.0;
/// Period assumed while unvoiced
pub const DEFAULT_PITCH_HZ: f64 = 120.0;

const CROSSING_HYSTERESIS: f64 = 0.005;

/// Zero-crossing pitch-period tracker (60 - 400 Hz)
#[derive(Debug, Clone)]
pub struct ZeroCrossingPitch {
    sample_rate: f64,
    armed: bool,
    since_crossing: usize,
    period: f64,
    voiced: bool,
}

impl ZeroCrossingPitch {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            armed: false,
            since_crossing: 0,
            period: sample_rate / DEFAULT_PITCH_HZ,
            voiced: false,
        }
    }

    /// Feed one sample. Returns `true` on a positive-going crossing (pulse start).
    #[inline]
    pub fn process(&mut self, x: Sample) -> bool {
        self.since_crossing = self.since_crossing.saturating_add(1);
        let min_period = self.sample_rate / MAX_PITCH_HZ;
        let max_period = self.sample_rate / MIN_PITCH_HZ;

        if x < -CROSSING_HYSTERESIS {
            self.armed = true;
        } else if self.armed && x > CROSSING_HYSTERESIS {
            self.armed = false;
            let interval = self.since_crossing as f64;
            if interval < min_period {
                // Too fast for a glottal pulse; treat as noise and keep counting
                return false;
            }
            self.since_crossing = 0;
            if interval <= max_period {
                self.period = interval;
                self.voiced = true;
            }
            return true;
        }

        if self.since_crossing as f64 > max_period {
            self.voiced = false;
        }
        false
    }

    /// Current period estimate in samples
    #[inline]
    pub fn period_samples(&self) -> f64 {
        self.period
    }

    #[inline]
    pub fn frequency(&self) -> f64 {
        self.sample_rate / self.period
    }

    #[inline]
    pub fn is_voiced(&self) -> bool {
        self.voiced
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.sample_rate);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEATURE DETECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Signal feature that can trigger a corporeal noise event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalFeature {
    /// Silence (or near-silence) to sound
    Onset,
    /// Sound to a sustained gap
    Pause,
    /// Voiced to audible-but-unvoiced
    Unvoiced,
}

impl SignalFeature {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::Onset, Self::Pause, Self::Unvoiced];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Onset => 0,
            Self::Pause => 1,
            Self::Unvoiced => 2,
        }
    }
}

/// Features found in one block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectedFeatures {
    found: [bool; SignalFeature::COUNT],
    /// RMS of the analyzed block
    pub level: f64,
}

impl DetectedFeatures {
    #[inline]
    pub fn contains(&self, feature: SignalFeature) -> bool {
        self.found[feature.index()]
    }

    pub fn is_empty(&self) -> bool {
        !self.found.iter().any(|&f| f)
    }

    pub fn iter(&self) -> impl Iterator<Item = SignalFeature> + '_ {
        SignalFeature::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

/// Per-feature sensitivity (0 - 1). Higher fires on subtler features.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensitivity {
    pub onset: f64,
    pub pause: f64,
    pub unvoiced: f64,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self {
            onset: 0.5,
            pause: 0.5,
            unvoiced: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Thresholds {
    /// Level above which the signal counts as sound (dBFS)
    gate_db: f64,
    /// Minimum rise over the previous block for an onset (dB)
    onset_rise_db: f64,
    /// Gap length before a pause is reported (seconds)
    pause_secs: f64,
    /// Zero-crossing rate above which sound counts as unvoiced (Hz)
    unvoiced_zcr_hz: f64,
}

impl Thresholds {
    fn from_sensitivity(s: &Sensitivity) -> Self {
        let s_on = s.onset.clamp(0.0, 1.0);
        let s_pa = s.pause.clamp(0.0, 1.0);
        let s_uv = s.unvoiced.clamp(0.0, 1.0);
        Self {
            gate_db: -35.0 - 15.0 * s_on,
            onset_rise_db: 12.0 - 9.0 * s_on,
            pause_secs: 0.040 + 0.080 * (1.0 - s_pa),
            unvoiced_zcr_hz: 4000.0 - 2500.0 * s_uv,
        }
    }
}

/// Block-rate onset / pause / unvoiced detector
#[derive(Debug, Clone)]
pub struct FeatureDetector {
    sample_rate: f64,
    thresholds: Thresholds,
    active: bool,
    voiced: bool,
    prev_level_db: f64,
    silent_secs: f64,
    pause_reported: bool,
    last_sample: Sample,
}

impl FeatureDetector {
    pub fn new(sample_rate: f64, sensitivity: Sensitivity) -> Self {
        Self {
            sample_rate,
            thresholds: Thresholds::from_sensitivity(&sensitivity),
            active: false,
            voiced: false,
            prev_level_db: -144.0,
            silent_secs: 0.0,
            // No pause before anything was heard
            pause_reported: true,
            last_sample: 0.0,
        }
    }

    pub fn set_sensitivity(&mut self, sensitivity: Sensitivity) {
        self.thresholds = Thresholds::from_sensitivity(&sensitivity);
    }

    /// Analyze one block of the dry anchor
    pub fn analyze(&mut self, block: &[Sample]) -> DetectedFeatures {
        let mut out = DetectedFeatures::default();
        if block.is_empty() {
            return out;
        }

        let mut energy = 0.0;
        let mut crossings = 0usize;
        let mut prev = self.last_sample;
        for &x in block {
            let x = if x.is_finite() { x } else { 0.0 };
            energy += x * x;
            if (x >= 0.0) != (prev >= 0.0) {
                crossings += 1;
            }
            prev = x;
        }
        self.last_sample = prev;

        let level = (energy / block.len() as f64).sqrt();
        let level_db = gain_to_db(level).max(-144.0);
        let block_secs = block.len() as f64 / self.sample_rate;
        let zcr_hz = crossings as f64 / (2.0 * block_secs);
        let t = self.thresholds;

        let active = level_db > t.gate_db;
        let voiced = active && zcr_hz < t.unvoiced_zcr_hz;

        if active {
            if !self.active && level_db - self.prev_level_db >= t.onset_rise_db {
                out.found[SignalFeature::Onset.index()] = true;
            }
            if self.voiced && !voiced {
                out.found[SignalFeature::Unvoiced.index()] = true;
            }
            self.silent_secs = 0.0;
            self.pause_reported = false;
        } else {
            self.silent_secs += block_secs;
            if !self.pause_reported && self.silent_secs >= t.pause_secs {
                out.found[SignalFeature::Pause.index()] = true;
                self.pause_reported = true;
            }
        }

        self.active = active;
        self.voiced = voiced;
        self.prev_level_db = level_db;
        out.level = level;
        out
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.voiced = false;
        self.prev_level_db = -144.0;
        self.silent_secs = 0.0;
        self.pause_reported = true;
        self.last_sample = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEASUREMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Pitch-period irregularity of a signal: mean absolute difference between
/// consecutive peak-to-peak intervals divided by the mean interval.
///
/// Peaks are local maxima above half the global peak, at least one
/// `MAX_PITCH_HZ` period apart. Returns `None` with fewer than 3 intervals.
pub fn period_jitter(signal: &[Sample], sample_rate: f64) -> Option<f64> {
    let peak = signal.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
    if peak <= 0.0 || !peak.is_finite() {
        return None;
    }
    let threshold = 0.5 * peak;
    let min_gap = (sample_rate / MAX_PITCH_HZ) as usize;
    let max_gap = (sample_rate / MIN_PITCH_HZ) as usize;

    let mut last_peak: Option<usize> = None;
    let mut prev_interval: Option<f64> = None;
    let mut diff_sum = 0.0;
    let mut interval_sum = 0.0;
    let mut diffs = 0usize;
    let mut intervals = 0usize;

    for i in 1..signal.len().saturating_sub(1) {
        let s = signal[i];
        if s < threshold || s < signal[i - 1] || s <= signal[i + 1] {
            continue;
        }
        match last_peak {
            Some(p) if i - p < min_gap => continue,
            Some(p) => {
                let gap = i - p;
                if gap <= max_gap {
                    let interval = gap as f64;
                    interval_sum += interval;
                    intervals += 1;
                    if let Some(prev) = prev_interval {
                        diff_sum += (interval - prev).abs();
                        diffs += 1;
                    }
                    prev_interval = Some(interval);
                } else {
                    // Gap between utterances; restart the interval chain
                    prev_interval = None;
                }
            }
            None => {}
        }
        last_peak = Some(i);
    }

    if intervals < 3 || diffs == 0 {
        return None;
    }
    Some((diff_sum / diffs as f64) / (interval_sum / intervals as f64))
}
