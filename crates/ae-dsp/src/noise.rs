//! Corporeal Noise Synthesizer
//!
//! Procedural wet clicks, raspy inhalations and bone-creak fry, triggered by
//! features of the dry anchor:
//!
//! | feature           | event      |
//! |-------------------|------------|
//! | onset             | `WetClick` |
//! | pause             | `Rasp`     |
//! | voiced → unvoiced | `Creak`    |
//!
//! Each event is seeded noise through its own bandpass resonator with an
//! attack/decay envelope, played from a fixed pool of event slots. Event level
//! never exceeds -6 dB relative to the tracked anchor level.

use ae_core::{AberrationParameters, NoiseEventConfig, NoiseEventKind, Sample, block_is_finite, db_to_gain};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::analysis::{FeatureDetector, Sensitivity, SignalFeature};
use crate::svf::{SvfMode, SvfParams, TptSvf};
use crate::{Processor, StateHealth};

/// Simultaneously sounding events per voice
pub const EVENT_SLOTS: usize = 4;

/// Loudest event relative to the anchor level (dB)
pub const MAX_EVENT_DB: f64 = -6.0;

/// Fry pulse rate of a creak (Hz)
const CREAK_PULSE_HZ: f64 = 35.0;

/// Sound design of one event kind
#[derive(Debug, Clone, Copy)]
struct EventShape {
    center_hz: f64,
    q: f64,
    attack_ms: f64,
    decay_ms: f64,
}

fn shape(kind: NoiseEventKind) -> EventShape {
    match kind {
        NoiseEventKind::WetClick => EventShape {
            center_hz: 2500.0,
            q: 3.0,
            attack_ms: 0.5,
            decay_ms: 15.0,
        },
        NoiseEventKind::Rasp => EventShape {
            center_hz: 3500.0,
            q: 0.8,
            attack_ms: 40.0,
            decay_ms: 180.0,
        },
        NoiseEventKind::Creak => EventShape {
            center_hz: 600.0,
            q: 4.0,
            attack_ms: 5.0,
            decay_ms: 120.0,
        },
    }
}

fn feature_kind(feature: SignalFeature) -> NoiseEventKind {
    match feature {
        SignalFeature::Onset => NoiseEventKind::WetClick,
        SignalFeature::Pause => NoiseEventKind::Rasp,
        SignalFeature::Unvoiced => NoiseEventKind::Creak,
    }
}

#[derive(Debug, Clone)]
struct EventSlot {
    active: bool,
    kind: NoiseEventKind,
    resonator: TptSvf,
    age: usize,
    attack: usize,
    decay: usize,
    gain: f64,
    pulse_period: usize,
}

impl EventSlot {
    fn new(sample_rate: f64) -> Self {
        Self {
            active: false,
            kind: NoiseEventKind::WetClick,
            resonator: TptSvf::new(SvfMode::Bandpass, sample_rate),
            age: 0,
            attack: 1,
            decay: 1,
            gain: 0.0,
            pulse_period: 0,
        }
    }

    #[inline]
    fn envelope(&self) -> f64 {
        if self.age < self.attack {
            self.age as f64 / self.attack as f64
        } else {
            let t = (self.age - self.attack) as f64 / self.decay as f64;
            (1.0 - t).max(0.0)
        }
    }
}

/// Per-voice corporeal noise event synthesizer
#[derive(Debug, Clone)]
pub struct CorporealNoise {
    sample_rate: f64,
    detector: FeatureDetector,
    events: [Option<NoiseEventConfig>; NoiseEventKind::COUNT],
    last_trigger: [f64; NoiseEventKind::COUNT],
    clock: f64,
    anchor_level: f64,
    slots: [EventSlot; EVENT_SLOTS],
    rng: ChaCha8Rng,
    triggered: [u64; NoiseEventKind::COUNT],
}

impl CorporealNoise {
    pub fn new(sample_rate: f64, seed: u64) -> Self {
        Self {
            sample_rate,
            detector: FeatureDetector::new(sample_rate, Sensitivity::default()),
            events: [None; NoiseEventKind::COUNT],
            last_trigger: [f64::NEG_INFINITY; NoiseEventKind::COUNT],
            clock: 0.0,
            anchor_level: 0.0,
            slots: std::array::from_fn(|_| EventSlot::new(sample_rate)),
            rng: ChaCha8Rng::seed_from_u64(seed),
            triggered: [0; NoiseEventKind::COUNT],
        }
    }

    /// Install a profile's enabled event table
    pub fn configure(&mut self, events: &[NoiseEventConfig]) {
        self.events = [None; NoiseEventKind::COUNT];
        for event in events {
            self.events[event.kind.index()] = Some(*event);
        }
        let sensitivity = |kind: NoiseEventKind| self.events[kind.index()].map_or(0.0, |e| e.sensitivity);
        self.detector.set_sensitivity(Sensitivity {
            onset: sensitivity(NoiseEventKind::WetClick),
            pause: sensitivity(NoiseEventKind::Rasp),
            unvoiced: sensitivity(NoiseEventKind::Creak),
        });
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Total events fired
    pub fn events_triggered(&self) -> u64 {
        self.triggered.iter().sum()
    }

    pub fn events_triggered_of(&self, kind: NoiseEventKind) -> u64 {
        self.triggered[kind.index()]
    }

    /// Events currently sounding
    pub fn active_events(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    fn trigger(&mut self, kind: NoiseEventKind, weight: f64) {
        let Some(config) = self.events[kind.index()] else {
            return;
        };
        let since = self.clock - self.last_trigger[kind.index()];
        if since * 1000.0 < config.min_interval_ms {
            return;
        }

        // Free slot, else steal the oldest
        let index = match self.slots.iter().position(|s| !s.active) {
            Some(i) => i,
            None => self
                .slots
                .iter()
                .enumerate()
                .max_by_key(|(_, s)| s.age)
                .map_or(0, |(i, _)| i),
        };

        let shape = shape(kind);
        let ms = |v: f64| ((v * 0.001 * self.sample_rate) as usize).max(1);
        let (attack, decay) = (ms(shape.attack_ms), ms(shape.decay_ms));
        let level_db = config.gain_db.min(MAX_EVENT_DB);
        let gain = db_to_gain(level_db) * self.anchor_level * weight.clamp(0.0, 1.0);
        let pulse_period = if kind == NoiseEventKind::Creak {
            (self.sample_rate / CREAK_PULSE_HZ) as usize
        } else {
            0
        };

        let slot = &mut self.slots[index];
        slot.active = true;
        slot.kind = kind;
        slot.resonator.reset();
        slot.resonator.set_params(SvfParams::new(shape.center_hz, shape.q));
        slot.age = 0;
        slot.attack = attack;
        slot.decay = decay;
        slot.gain = gain;
        slot.pulse_period = pulse_period;

        self.last_trigger[kind.index()] = self.clock;
        self.triggered[kind.index()] += 1;
    }

    /// Detect features in `dry` and mix sounding events into `block`
    pub fn process_block(&mut self, block: &mut [Sample], dry: &[Sample], params: &AberrationParameters) -> StateHealth {
        let features = self.detector.analyze(dry);
        if features.level.is_finite() {
            // Fast rise, slow fall: pauses still know how loud the voice was
            self.anchor_level = if features.level > self.anchor_level {
                features.level
            } else {
                0.9 * self.anchor_level + 0.1 * features.level
            };
        }

        for feature in features.iter() {
            let kind = feature_kind(feature);
            let weight = params.noise_weight(kind);
            if weight > 0.0 {
                self.trigger(kind, weight);
            }
        }

        // Overlapping events share one ceiling
        let ceiling = db_to_gain(MAX_EVENT_DB) * self.anchor_level;
        if self.slots.iter().any(|s| s.active) {
            for sample in block.iter_mut() {
                let mut sum = 0.0;
                for slot in self.slots.iter_mut().filter(|s| s.active) {
                    let excitation: f64 = if slot.pulse_period == 0 || slot.age % slot.pulse_period < 24 {
                        self.rng.random_range(-1.0..1.0)
                    } else {
                        0.0
                    };
                    let tone = slot.resonator.process(excitation).clamp(-1.0, 1.0);
                    sum += slot.gain * slot.envelope() * tone;
                    slot.age += 1;
                    if slot.age >= slot.attack + slot.decay {
                        slot.active = false;
                    }
                }
                *sample += sum.clamp(-ceiling, ceiling);
            }
        }

        self.clock += block.len() as f64 / self.sample_rate;

        let states_ok = self.slots.iter().all(|s| s.resonator.state().is_finite());
        if !states_ok || !block_is_finite(block) {
            self.reset();
            block.fill(0.0);
            return StateHealth::Recovered;
        }
        for slot in self.slots.iter_mut() {
            slot.resonator.state_mut().flush();
        }
        StateHealth::Healthy
    }
}

impl Processor for CorporealNoise {
    fn reset(&mut self) {
        self.detector.reset();
        for slot in self.slots.iter_mut() {
            slot.active = false;
            slot.resonator.reset();
        }
        self.last_trigger = [f64::NEG_INFINITY; NoiseEventKind::COUNT];
        self.clock = 0.0;
        self.anchor_level = 0.0;
    }
}
