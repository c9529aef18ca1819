//! Error types for the Aberration Engine
//!
//! Only control-thread APIs return these. The audio thread never fails;
//! it reports through fault flags instead (see `fault`).

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum AeError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown archetype: {0}")]
    UnknownArchetype(String),

    #[error("Voice pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    #[error("Stale voice handle (slot {slot}, generation {generation})")]
    StaleHandle { slot: u32, generation: u32 },

    #[error("Sample rate mismatch: anchor {anchor} Hz, engine {engine} Hz")]
    SampleRateMismatch { anchor: u32, engine: u32 },

    #[error("Audio command queue full")]
    CommandQueueFull,

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type AeResult<T> = Result<T, AeError>;
