//! ae-engine: voice runtime for the Aberration Engine
//!
//! ## Modules
//! - `config` - engine configuration (JSON)
//! - `anchor` - shared anchor clips and per-voice cursors
//! - `pool` - generation-checked voice slots
//! - `lod` - tier assignment, budgets and Far clustering
//! - `voice` - per-voice processing chain
//! - `bus` - shared Far-tier cluster buses
//! - `engine` - controller / renderer split and the command protocol

pub mod anchor;
pub mod bus;
pub mod config;
pub mod engine;
pub mod lod;
pub mod pool;
pub mod voice;

pub use anchor::{AnchorClip, AnchorCursor};
pub use config::{EngineConfig, ExhaustionPolicy};
pub use engine::{AudioCommand, AudioEngine, AudioRenderer, EngineController, Retired, VoiceRequest};
pub use lod::{LodConfig, LodTier};
pub use pool::VoiceHandle;
