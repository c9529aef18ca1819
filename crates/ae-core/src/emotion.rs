//! Emotion / proximity input from the behaviour layer
//!
//! The game decides *what* state an NPC is in; this module only describes
//! the numeric vector it hands over and how a profile reacts to it.

use serde::{Deserialize, Serialize};

/// Archetype-relative emotional state plus listener proximity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmotionState {
    /// Calm (-1) to agitated (+1)
    #[serde(default)]
    pub intensity: f64,
    /// 0 - 1
    #[serde(default)]
    pub aggression: f64,
    /// 0 - 1, how "worn out" the voice source is
    #[serde(default)]
    pub fatigue: f64,
    /// 0 (far) - 1 (at the listener's ear)
    #[serde(default)]
    pub proximity: f64,
}

impl EmotionState {
    /// Copy with every component clamped into its range (NaN -> 0)
    pub fn clamped(&self) -> Self {
        let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            intensity: if self.intensity.is_finite() {
                self.intensity.clamp(-1.0, 1.0)
            } else {
                0.0
            },
            aggression: unit(self.aggression),
            fatigue: unit(self.fatigue),
            proximity: unit(self.proximity),
        }
    }
}

/// How strongly a profile's target moves per unit of emotional input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionResponse {
    /// Tension added per unit aggression
    #[serde(default = "default_aggression_tension")]
    pub aggression_tension: f64,
    /// Subharmonic depth added per unit aggression
    #[serde(default = "default_aggression_subharmonic")]
    pub aggression_subharmonic: f64,
    /// Jitter/shimmer added per unit fatigue
    #[serde(default = "default_fatigue_irregularity")]
    pub fatigue_irregularity: f64,
    /// Breathiness added per unit fatigue
    #[serde(default = "default_fatigue_breath")]
    pub fatigue_breath: f64,
    /// Gain trim (dB) per unit intensity
    #[serde(default = "default_intensity_gain_db")]
    pub intensity_gain_db: f64,
    /// Noise-layer mix added per unit proximity
    #[serde(default = "default_proximity_detail")]
    pub proximity_detail: f64,
}

fn default_aggression_tension() -> f64 {
    0.3
}
fn default_aggression_subharmonic() -> f64 {
    0.4
}
fn default_fatigue_irregularity() -> f64 {
    0.35
}
fn default_fatigue_breath() -> f64 {
    0.25
}
fn default_intensity_gain_db() -> f64 {
    3.0
}
fn default_proximity_detail() -> f64 {
    0.3
}

impl Default for EmotionResponse {
    fn default() -> Self {
        Self {
            aggression_tension: 0.3,
            aggression_subharmonic: 0.4,
            fatigue_irregularity: 0.35,
            fatigue_breath: 0.25,
            intensity_gain_db: 3.0,
            proximity_detail: 0.3,
        }
    }
}
