//! Archetype Profiles
//!
//! Immutable voice-target assets authored offline and loaded once. A profile
//! is shared by reference (`Arc`) between every voice speaking with it and is
//! never mutated after it has been published to the engine.

use crate::emotion::{EmotionResponse, EmotionState};
use crate::params::{AberrationParameters, MAX_FORMANT_BANDS, MIN_FORMANT_BANDS, NoiseEventKind};
use crate::{AeError, AeResult};
use serde::{Deserialize, Serialize};

/// Profile format version
pub const PROFILE_VERSION: u32 = 1;

/// One spectral resonance of the archetype's vocal tract
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormantBand {
    /// Resonance center before shifting (Hz)
    pub center_hz: f64,
    /// Base resonance Q
    pub q: f64,
    /// Base resonance boost (dB)
    pub gain_db: f64,
}

impl FormantBand {
    pub const fn new(center_hz: f64, q: f64, gain_db: f64) -> Self {
        Self { center_hz, q, gain_db }
    }
}

/// Optional processing modules enabled by a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSet {
    #[serde(default = "default_true")]
    pub glottal: bool,
    #[serde(default = "default_true")]
    pub subharmonic: bool,
    #[serde(default = "default_true")]
    pub breath: bool,
    #[serde(default = "default_true")]
    pub noise: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ModuleSet {
    fn default() -> Self {
        Self::ALL
    }
}

impl ModuleSet {
    pub const ALL: Self = Self {
        glottal: true,
        subharmonic: true,
        breath: true,
        noise: true,
    };

    pub const NONE: Self = Self {
        glottal: false,
        subharmonic: false,
        breath: false,
        noise: false,
    };
}

/// Trigger configuration for one enabled noise event type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseEventConfig {
    pub kind: NoiseEventKind,
    /// Trigger sensitivity (0 - 1); higher fires on subtler features
    pub sensitivity: f64,
    /// Event level relative to the anchor level (dB, <= 0)
    #[serde(default = "default_event_gain_db")]
    pub gain_db: f64,
    /// Minimum time between two events of this kind (ms)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: f64,
}

fn default_event_gain_db() -> f64 {
    -12.0
}
fn default_min_interval_ms() -> f64 {
    250.0
}

impl NoiseEventConfig {
    pub fn new(kind: NoiseEventKind, sensitivity: f64) -> Self {
        Self {
            kind,
            sensitivity,
            gain_db: default_event_gain_db(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

/// Perceptual thresholds for the glottal incoherence module
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlottalTuning {
    /// Pitch-period deviation at jitter = 1 (ms)
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: f64,
    /// Per-period amplitude deviation at shimmer = 1 (dB)
    #[serde(default = "default_max_shimmer_db")]
    pub max_shimmer_db: f64,
    /// Probability per period of a dropped/doubled pulse at jitter = 1
    #[serde(default = "default_pulse_fault_rate")]
    pub pulse_fault_rate: f64,
}

fn default_max_jitter_ms() -> f64 {
    1.5
}
fn default_max_shimmer_db() -> f64 {
    3.0
}
fn default_pulse_fault_rate() -> f64 {
    0.05
}

impl Default for GlottalTuning {
    fn default() -> Self {
        Self {
            max_jitter_ms: 1.5,
            max_shimmer_db: 3.0,
            pulse_fault_rate: 0.05,
        }
    }
}

/// Envelope timing of one sub-octave burst
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurstTiming {
    #[serde(default = "default_rise_ms")]
    pub rise_ms: f64,
    #[serde(default = "default_sustain_min_ms")]
    pub sustain_min_ms: f64,
    #[serde(default = "default_sustain_max_ms")]
    pub sustain_max_ms: f64,
    #[serde(default = "default_fall_ms")]
    pub fall_ms: f64,
}

fn default_rise_ms() -> f64 {
    80.0
}
fn default_sustain_min_ms() -> f64 {
    250.0
}
fn default_sustain_max_ms() -> f64 {
    700.0
}
fn default_fall_ms() -> f64 {
    150.0
}

impl Default for BurstTiming {
    fn default() -> Self {
        Self {
            rise_ms: 80.0,
            sustain_min_ms: 250.0,
            sustain_max_ms: 700.0,
            fall_ms: 150.0,
        }
    }
}

impl BurstTiming {
    /// Mean duration of one complete burst (ms)
    pub fn mean_burst_ms(&self) -> f64 {
        self.rise_ms + 0.5 * (self.sustain_min_ms + self.sustain_max_ms) + self.fall_ms
    }
}

/// Built-in archetypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Vampire,
    Zombie,
    Werewolf,
    Wraith,
    Lich,
    Ghoul,
}

impl Archetype {
    pub const ALL: [Self; 6] = [
        Self::Vampire,
        Self::Zombie,
        Self::Werewolf,
        Self::Wraith,
        Self::Lich,
        Self::Ghoul,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Vampire => "vampire",
            Self::Zombie => "zombie",
            Self::Werewolf => "werewolf",
            Self::Wraith => "wraith",
            Self::Lich => "lich",
            Self::Ghoul => "ghoul",
        }
    }
}

/// Complete archetype voice profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeProfile {
    /// Profile format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Unique archetype name
    pub name: String,
    /// Formant layout (3 - 5 bands)
    pub formants: Vec<FormantBand>,
    /// Voice target
    #[serde(default)]
    pub target: AberrationParameters,
    /// Enabled optional modules
    #[serde(default)]
    pub modules: ModuleSet,
    /// Enabled noise event types
    #[serde(default)]
    pub noise_events: Vec<NoiseEventConfig>,
    #[serde(default)]
    pub glottal: GlottalTuning,
    #[serde(default)]
    pub subharmonic: BurstTiming,
    #[serde(default)]
    pub emotion: EmotionResponse,
}

fn default_version() -> u32 {
    PROFILE_VERSION
}

const NEUTRAL_FORMANTS: [FormantBand; MAX_FORMANT_BANDS] = [
    FormantBand::new(600.0, 5.0, 6.0),
    FormantBand::new(1200.0, 6.0, 5.0),
    FormantBand::new(2500.0, 7.0, 4.0),
    FormantBand::new(3500.0, 8.0, 3.0),
    FormantBand::new(4500.0, 8.0, 2.0),
];

impl ArchetypeProfile {
    /// Neutral profile with the given name and `bands` formants
    pub fn neutral(name: impl Into<String>, bands: usize) -> Self {
        let bands = bands.clamp(MIN_FORMANT_BANDS, MAX_FORMANT_BANDS);
        Self {
            version: PROFILE_VERSION,
            name: name.into(),
            formants: NEUTRAL_FORMANTS[..bands].to_vec(),
            target: AberrationParameters::neutral(),
            modules: ModuleSet::ALL,
            noise_events: Vec::new(),
            glottal: GlottalTuning::default(),
            subharmonic: BurstTiming::default(),
            emotion: EmotionResponse::default(),
        }
    }

    /// Built-in preset
    pub fn preset(archetype: Archetype) -> Self {
        use NoiseEventKind::*;

        let params = |shift: [f64; MAX_FORMANT_BANDS],
                      tension: f64,
                      breathiness: f64,
                      jitter: f64,
                      shimmer: f64,
                      sub: (f64, f64),
                      noise: [f64; NoiseEventKind::COUNT],
                      gain_trim_db: f64| AberrationParameters {
            formant_shift: shift,
            tension,
            breathiness,
            jitter,
            shimmer,
            subharmonic_depth: sub.0,
            subharmonic_duty: sub.1,
            noise_mix: noise,
            gain_trim_db,
        };

        let mut profile = match archetype {
            Archetype::Vampire => {
                let mut p = Self::neutral("vampire", 5);
                p.target = params(
                    [0.92, 0.95, 1.05, 1.15, 1.2],
                    0.45,
                    0.55,
                    0.05,
                    0.1,
                    (0.15, 0.1),
                    [0.2, 0.35, 0.0],
                    -2.0,
                );
                p.noise_events = vec![
                    NoiseEventConfig::new(WetClick, 0.4),
                    NoiseEventConfig::new(Rasp, 0.6),
                ];
                p
            }
            Archetype::Zombie => {
                let mut p = Self::neutral("zombie", 4);
                p.target = params(
                    [0.8, 0.85, 0.9, 0.95, 1.0],
                    0.6,
                    0.35,
                    0.8,
                    0.75,
                    (0.2, 0.1),
                    [0.6, 0.5, 0.7],
                    -3.0,
                );
                p.noise_events = vec![
                    NoiseEventConfig::new(WetClick, 0.8),
                    NoiseEventConfig::new(Rasp, 0.7),
                    NoiseEventConfig::new(Creak, 0.8),
                ];
                p.glottal.pulse_fault_rate = 0.08;
                p
            }
            Archetype::Werewolf => {
                let mut p = Self::neutral("werewolf", 4);
                p.target = params(
                    [0.7, 0.75, 0.85, 0.9, 0.95],
                    0.75,
                    0.3,
                    0.25,
                    0.3,
                    (0.85, 0.35),
                    [0.2, 0.6, 0.3],
                    -4.0,
                );
                p.noise_events = vec![
                    NoiseEventConfig::new(Rasp, 0.7),
                    NoiseEventConfig::new(Creak, 0.5),
                ];
                p.subharmonic = BurstTiming {
                    rise_ms: 80.0,
                    sustain_min_ms: 300.0,
                    sustain_max_ms: 900.0,
                    fall_ms: 150.0,
                };
                p.emotion.aggression_subharmonic = 0.6;
                p
            }
            Archetype::Wraith => {
                let mut p = Self::neutral("wraith", 5);
                p.target = params(
                    [1.2, 1.3, 1.4, 1.5, 1.6],
                    0.3,
                    0.9,
                    0.15,
                    0.4,
                    (0.0, 0.0),
                    [0.0, 0.5, 0.0],
                    -6.0,
                );
                p.modules.subharmonic = false;
                p.noise_events = vec![NoiseEventConfig::new(Rasp, 0.5)];
                p
            }
            Archetype::Lich => {
                let mut p = Self::neutral("lich", 3);
                p.target = params(
                    [0.65, 0.7, 0.8, 0.9, 1.0],
                    0.85,
                    0.2,
                    0.35,
                    0.2,
                    (0.5, 0.6),
                    [0.1, 0.2, 0.6],
                    -5.0,
                );
                p.noise_events = vec![NoiseEventConfig::new(Creak, 0.6)];
                p.subharmonic = BurstTiming {
                    rise_ms: 200.0,
                    sustain_min_ms: 600.0,
                    sustain_max_ms: 1500.0,
                    fall_ms: 300.0,
                };
                p
            }
            Archetype::Ghoul => {
                let mut p = Self::neutral("ghoul", 4);
                p.target = params(
                    [0.85, 0.9, 1.1, 1.2, 1.3],
                    0.55,
                    0.5,
                    0.5,
                    0.5,
                    (0.3, 0.2),
                    [0.8, 0.4, 0.4],
                    -3.0,
                );
                p.noise_events = vec![
                    NoiseEventConfig::new(WetClick, 0.7),
                    NoiseEventConfig::new(Rasp, 0.4),
                    NoiseEventConfig::new(Creak, 0.4),
                ];
                p
            }
        };
        profile.version = PROFILE_VERSION;
        profile
    }

    /// Load a single profile from JSON
    pub fn from_json(json: &str) -> AeResult<Self> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Save profile to JSON string
    pub fn to_json(&self) -> AeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the profile is a usable asset
    pub fn validate(&self) -> AeResult<()> {
        let err = |msg: String| Err(AeError::Profile(format!("{}: {}", self.name, msg)));

        if self.version != PROFILE_VERSION {
            return err(format!("unsupported profile version {}", self.version));
        }
        if self.name.trim().is_empty() {
            return Err(AeError::Profile("profile name is empty".to_string()));
        }
        if !(MIN_FORMANT_BANDS..=MAX_FORMANT_BANDS).contains(&self.formants.len()) {
            return err(format!(
                "expected {}-{} formant bands, got {}",
                MIN_FORMANT_BANDS,
                MAX_FORMANT_BANDS,
                self.formants.len()
            ));
        }
        for (i, band) in self.formants.iter().enumerate() {
            if !(50.0..=12_000.0).contains(&band.center_hz) {
                return err(format!("formant {} center {} Hz out of range", i, band.center_hz));
            }
            if !(0.3..=40.0).contains(&band.q) {
                return err(format!("formant {} Q {} out of range", i, band.q));
            }
            if !(-24.0..=24.0).contains(&band.gain_db) {
                return err(format!("formant {} gain {} dB out of range", i, band.gain_db));
            }
        }
        if !self.target.is_valid() {
            return err("target parameters out of range".to_string());
        }

        let mut seen = [false; NoiseEventKind::COUNT];
        for event in &self.noise_events {
            if std::mem::replace(&mut seen[event.kind.index()], true) {
                return err(format!("duplicate noise event {:?}", event.kind));
            }
            if !(0.0..=1.0).contains(&event.sensitivity) {
                return err(format!("{:?} sensitivity out of range", event.kind));
            }
            if !(-60.0..=0.0).contains(&event.gain_db) {
                return err(format!("{:?} gain {} dB out of range", event.kind, event.gain_db));
            }
            if !(event.min_interval_ms >= 10.0 && event.min_interval_ms.is_finite()) {
                return err(format!("{:?} min interval too short", event.kind));
            }
        }

        let g = &self.glottal;
        if !(0.0..=5.0).contains(&g.max_jitter_ms)
            || !(0.0..=6.0).contains(&g.max_shimmer_db)
            || !(0.0..=0.5).contains(&g.pulse_fault_rate)
        {
            return err("glottal tuning out of range".to_string());
        }

        let b = &self.subharmonic;
        if !(b.rise_ms > 0.0 && b.fall_ms > 0.0 && b.sustain_min_ms >= 0.0)
            || b.sustain_min_ms > b.sustain_max_ms
            || b.mean_burst_ms() > 20_000.0
        {
            return err("subharmonic burst timing invalid".to_string());
        }

        Ok(())
    }

    /// Noise event configuration for a kind, if enabled
    pub fn noise_event(&self, kind: NoiseEventKind) -> Option<&NoiseEventConfig> {
        self.noise_events.iter().find(|e| e.kind == kind)
    }

    /// Target parameters for an emotional state
    pub fn target_for(&self, emotion: &EmotionState) -> AberrationParameters {
        let e = emotion.clamped();
        let r = &self.emotion;
        let mut t = self.target;

        t.tension += r.aggression_tension * e.aggression;
        t.subharmonic_depth += r.aggression_subharmonic * e.aggression;
        t.subharmonic_duty += 0.5 * r.aggression_subharmonic * e.aggression;
        t.jitter += r.fatigue_irregularity * e.fatigue;
        t.shimmer += r.fatigue_irregularity * e.fatigue;
        t.breathiness += r.fatigue_breath * e.fatigue + 0.5 * r.proximity_detail * e.proximity;
        t.gain_trim_db += r.intensity_gain_db * e.intensity;
        for event in &self.noise_events {
            t.noise_mix[event.kind.index()] += r.proximity_detail * e.proximity;
        }

        t.sanitize();
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for archetype in Archetype::ALL {
            let profile = ArchetypeProfile::preset(archetype);
            assert_eq!(profile.name, archetype.name());
            profile.validate().unwrap();
        }
    }

    #[test]
    fn test_json_round_trip_preserves_profile() {
        let profile = ArchetypeProfile::preset(Archetype::Werewolf);
        let json = profile.to_json().unwrap();
        let loaded = ArchetypeProfile::from_json(&json).unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "name": "banshee",
            "formants": [
                { "center_hz": 700.0, "q": 4.0, "gain_db": 6.0 },
                { "center_hz": 1400.0, "q": 5.0, "gain_db": 4.0 },
                { "center_hz": 2800.0, "q": 6.0, "gain_db": 3.0 }
            ],
            "target": { "breathiness": 0.7 }
        }"#;
        let profile = ArchetypeProfile::from_json(json).unwrap();
        assert_eq!(profile.modules, ModuleSet::ALL);
        assert_eq!(profile.target.breathiness, 0.7);
        assert_eq!(profile.glottal, GlottalTuning::default());
    }

    #[test]
    fn test_rejects_bad_band_count() {
        let mut profile = ArchetypeProfile::preset(Archetype::Zombie);
        profile.formants.truncate(2);
        assert!(matches!(profile.validate(), Err(AeError::Profile(_))));
    }

    #[test]
    fn test_rejects_duplicate_noise_events() {
        let mut profile = ArchetypeProfile::preset(Archetype::Zombie);
        profile
            .noise_events
            .push(NoiseEventConfig::new(NoiseEventKind::Rasp, 0.2));
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_target() {
        let mut profile = ArchetypeProfile::preset(Archetype::Lich);
        profile.target.jitter = 4.0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_emotion_moves_target_within_range() {
        let profile = ArchetypeProfile::preset(Archetype::Werewolf);
        let calm = profile.target_for(&EmotionState::default());
        assert_eq!(calm, profile.target);

        let enraged = profile.target_for(&EmotionState {
            intensity: 1.0,
            aggression: 1.0,
            fatigue: 0.0,
            proximity: 1.0,
        });
        assert!(enraged.subharmonic_depth > calm.subharmonic_depth);
        assert!(enraged.tension > calm.tension);
        assert!(enraged.gain_trim_db > calm.gain_trim_db);
        assert!(enraged.is_valid());
    }
}
