//! Engine configuration
//!
//! Loaded once on the control thread before the audio thread starts.

use ae_core::{AeError, AeResult, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use ae_dsp::smoothing::SmootherConfig;
use serde::{Deserialize, Serialize};

use crate::lod::LodConfig;

/// Largest processing block
pub const MAX_BLOCK_SIZE: usize = 4096;

/// What `start_voice` does when every slot is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Refuse the new voice
    #[default]
    Deny,
    /// Stop the least important active voice and reuse its slot
    ReclaimLeastImportant,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine sample rate (Hz); anchors must match
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per processing block
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Voice pool capacity
    #[serde(default = "default_max_voices")]
    pub max_voices: usize,
    #[serde(default)]
    pub exhaustion_policy: ExhaustionPolicy,
    /// Control to audio command ring capacity
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// Base seed for per-voice random streams
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub smoothing: SmootherConfig,
    #[serde(default)]
    pub lod: LodConfig,
}

fn default_sample_rate() -> u32 {
    48_000
}
fn default_block_size() -> usize {
    256
}
fn default_max_voices() -> usize {
    1024
}
fn default_command_capacity() -> usize {
    4096
}
fn default_seed() -> u64 {
    0x5EED_AB3E_2A71_0001
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            max_voices: default_max_voices(),
            exhaustion_policy: ExhaustionPolicy::Deny,
            command_capacity: default_command_capacity(),
            seed: default_seed(),
            smoothing: SmootherConfig::default(),
            lod: LodConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> AeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        log::info!(
            "Loaded engine config: {} Hz, block {}, {} voices",
            config.sample_rate,
            config.block_size,
            config.max_voices
        );
        Ok(config)
    }

    pub fn to_json(&self) -> AeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> AeResult<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(AeError::Config(format!("sample_rate {} Hz out of range", self.sample_rate)));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(AeError::Config(format!(
                "block_size must be 1-{}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.max_voices == 0 || self.max_voices > u32::MAX as usize {
            return Err(AeError::Config("max_voices must be at least 1".to_string()));
        }
        if self.command_capacity < 16 {
            return Err(AeError::Config("command_capacity must be at least 16".to_string()));
        }
        self.lod.validate().map_err(AeError::Config)
    }

    #[inline]
    pub fn sample_rate_f64(&self) -> f64 {
        self.sample_rate as f64
    }

    /// Duration of one block in seconds
    #[inline]
    pub fn block_secs(&self) -> f64 {
        self.block_size as f64 / self.sample_rate as f64
    }
}
