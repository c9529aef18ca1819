//! ae-core: Shared types for the Aberration Engine
//!
//! This crate provides the foundational types used across all engine crates:
//! sample helpers, the validated `AberrationParameters` set, immutable
//! `ArchetypeProfile` assets and the fault taxonomy reported by the audio thread.

mod sample;
mod error;
mod params;
mod profile;
mod library;
mod emotion;
mod fault;

pub use sample::*;
pub use error::*;
pub use params::*;
pub use profile::*;
pub use library::*;
pub use emotion::*;
pub use fault::*;

/// Lowest supported engine sample rate
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest supported engine sample rate
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Decibel value wrapper
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        db_to_gain(self.0)
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Convert decibels to linear gain (-144 dB and below is silence)
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    if db <= -144.0 {
        0.0
    } else {
        10.0_f64.powf(db / 20.0)
    }
}

/// Convert linear gain to decibels
#[inline]
pub fn gain_to_db(gain: f64) -> f64 {
    Decibels::from_gain(gain).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_round_trip_points() {
        assert_relative_eq!(db_to_gain(0.0), 1.0);
        assert_relative_eq!(db_to_gain(-6.0), 0.501187, epsilon = 1e-6);
        assert_eq!(db_to_gain(-200.0), 0.0);
        assert_eq!(gain_to_db(0.0), f64::NEG_INFINITY);
        assert_relative_eq!(gain_to_db(10.0), 20.0);
    }
}
