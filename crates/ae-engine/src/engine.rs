//! Engine runtime
//!
//! `AudioEngine::new` splits the engine into two halves:
//! - `EngineController` lives on the control (game) thread. It owns the
//!   voice pool, LOD decisions and cluster map, validates requests and logs.
//! - `AudioRenderer` lives on the audio thread. It owns every voice and bus
//!   and only ever drains commands, processes blocks and raises fault flags.
//!
//! Commands travel over an SPSC ring; per-voice targets over triple-buffer
//! mailboxes. `Arc`s the audio thread lets go of are shipped back over a
//! second ring so the controller drops them.

use ae_core::{
    AberrationParameters, AeError, AeResult, ArchetypeId, ArchetypeLibrary, ArchetypeProfile, EmotionState,
    FaultFlags, FaultKind, Sample,
};
use ae_dsp::denormal::DenormalGuard;
use ae_realtime::{FaultBoard, ParamPublisher, QueueConsumer, QueueProducer, SpscQueue, mailbox};
use std::sync::Arc;
use std::time::Duration;

use crate::anchor::AnchorClip;
use crate::bus::ClusterBus;
use crate::config::EngineConfig;
use crate::lod::{BusId, ClusterKey, ClusterMap, LodManager, LodTier, TierChange};
use crate::pool::{VoiceHandle, VoicePool};
use crate::voice::{Released, VoiceInstance, VoiceStart, mix_seed};

// ═══════════════════════════════════════════════════════════════════════════════
// MESSAGES
// ═══════════════════════════════════════════════════════════════════════════════

/// Control -> audio command
#[derive(Debug)]
pub enum AudioCommand {
    Start {
        slot: u32,
        voice: VoiceStart,
        bus: Option<BusId>,
    },
    Stop {
        slot: u32,
    },
    SetTier {
        slot: u32,
        tier: LodTier,
        bus: Option<BusId>,
    },
    ConfigureBus {
        bus: BusId,
        profile: Arc<ArchetypeProfile>,
    },
}

/// Audio -> control: an asset reference to drop off the audio thread
#[derive(Debug)]
pub enum Retired {
    Profile(Arc<ArchetypeProfile>),
    Clip(Arc<AnchorClip>),
}

/// Parameters of a new voice
#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub archetype: ArchetypeId,
    pub clip: Arc<AnchorClip>,
    /// Listener distance (m)
    pub distance: f64,
    /// Azimuth around the listener (radians)
    pub direction: f64,
    /// Narrative importance (0 - 1)
    pub importance: f64,
    pub emotion: EmotionState,
    pub looping: bool,
}

impl VoiceRequest {
    pub fn new(archetype: ArchetypeId, clip: Arc<AnchorClip>) -> Self {
        Self {
            archetype,
            clip,
            distance: 0.0,
            direction: 0.0,
            importance: 0.0,
            emotion: EmotionState::default(),
            looping: false,
        }
    }

    pub fn at(mut self, distance: f64, direction: f64) -> Self {
        self.distance = distance;
        self.direction = direction;
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn emotion(mut self, emotion: EmotionState) -> Self {
        self.emotion = emotion;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

/// Entry point
pub struct AudioEngine;

impl AudioEngine {
    /// Build both halves with every slot, bus and ring preallocated
    pub fn new(config: EngineConfig, library: ArchetypeLibrary) -> AeResult<(EngineController, AudioRenderer)> {
        config.validate()?;
        if library.is_empty() {
            return Err(AeError::Config("archetype library is empty".to_string()));
        }

        let capacity = config.max_voices;
        let buses = config.lod.far_buses;
        let sample_rate = config.sample_rate_f64();

        let (commands_tx, commands_rx) = SpscQueue::new(config.command_capacity).split();
        let garbage_capacity = 2 * config.command_capacity + 2 * capacity + buses;
        let (garbage_tx, garbage_rx) = SpscQueue::new(garbage_capacity).split();
        let faults = Arc::new(FaultBoard::new(capacity + buses));

        let mut publishers = Vec::with_capacity(capacity);
        let mut voices = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let (publisher, receiver) = mailbox(AberrationParameters::neutral());
            publishers.push(publisher);
            voices.push(VoiceInstance::new(sample_rate, config.block_size, config.smoothing, receiver));
        }
        let cluster_buses = (0..buses)
            .map(|_| ClusterBus::new(sample_rate, config.block_size, config.smoothing))
            .collect();

        log::info!(
            "Aberration engine: {} voices, {} far buses, {} Hz / {} samples, {} archetypes",
            capacity,
            buses,
            config.sample_rate,
            config.block_size,
            library.len()
        );

        let controller = EngineController {
            pool: VoicePool::new(capacity),
            lod: LodManager::new(config.lod.clone(), capacity),
            clusters: ClusterMap::new(buses, config.lod.direction_buckets, capacity),
            publishers,
            voices: vec![ControlVoice::default(); capacity],
            commands: commands_tx,
            garbage: garbage_rx,
            faults: Arc::clone(&faults),
            changes: Vec::with_capacity(capacity),
            now: Duration::ZERO,
            serial: 0,
            library,
            config,
        };
        let renderer = AudioRenderer {
            voices,
            buses: cluster_buses,
            voice_bus: vec![None; capacity],
            commands: commands_rx,
            garbage: garbage_tx,
            faults,
            block_index: 0,
            garbage_overflow: 0,
        };
        Ok((controller, renderer))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL SIDE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
struct ControlVoice {
    profile: Option<Arc<ArchetypeProfile>>,
    archetype: Option<ArchetypeId>,
    direction: u16,
}

/// Control-thread half of the engine
pub struct EngineController {
    config: EngineConfig,
    library: ArchetypeLibrary,
    pool: VoicePool,
    lod: LodManager,
    clusters: ClusterMap,
    publishers: Vec<ParamPublisher<AberrationParameters>>,
    voices: Vec<ControlVoice>,
    commands: QueueProducer<AudioCommand>,
    garbage: QueueConsumer<Retired>,
    faults: Arc<FaultBoard>,
    changes: Vec<TierChange>,
    now: Duration,
    serial: u64,
}

impl EngineController {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn library(&self) -> &ArchetypeLibrary {
        &self.library
    }

    /// Start a voice; the returned handle addresses it until it stops
    pub fn start_voice(&mut self, request: VoiceRequest) -> AeResult<VoiceHandle> {
        let profile = self
            .library
            .get(request.archetype)
            .cloned()
            .ok_or_else(|| AeError::UnknownArchetype(format!("id {}", request.archetype.0)))?;
        if request.clip.sample_rate() != self.config.sample_rate {
            return Err(AeError::SampleRateMismatch {
                anchor: request.clip.sample_rate(),
                engine: self.config.sample_rate,
            });
        }
        // Room for a bus claim plus the start itself
        if self.commands.slots() < 2 {
            return Err(AeError::CommandQueueFull);
        }

        let allocation = match self.pool.allocate(request.importance, self.config.exhaustion_policy) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.faults.count(FaultKind::PoolExhaustion);
                log::warn!("Voice request for {} denied: {}", profile.name, e);
                return Err(e);
            }
        };
        if let Some(victim) = allocation.reclaimed {
            self.faults.count(FaultKind::PoolExhaustion);
            log::warn!(
                "Voice pool full: reclaimed slot {} (generation {}) for {}",
                victim.slot,
                victim.generation,
                profile.name
            );
            self.clusters.leave(victim.index());
            self.lod.deactivate(victim.index());
        }

        let handle = allocation.handle;
        let slot = handle.index();
        // Flags of the previous occupant do not carry over
        self.faults.take(slot);
        let tier = self.lod.activate(slot, request.distance, request.importance, self.now);
        let direction = self.config.lod.direction_bucket(request.direction);
        self.voices[slot] = ControlVoice {
            profile: Some(Arc::clone(&profile)),
            archetype: Some(request.archetype),
            direction,
        };
        let bus = if tier == LodTier::Far { self.join_cluster(slot) } else { None };

        let target = profile.target_for(&request.emotion);
        self.serial += 1;
        let voice = VoiceStart {
            profile,
            clip: request.clip,
            looping: request.looping,
            seed: mix_seed(self.config.seed, self.serial),
            tier,
            initial: target,
        };
        // The target must be visible before the voice starts reading it
        self.publishers[slot].publish(target);

        if self.commands.push(AudioCommand::Start { slot: handle.slot, voice, bus }).is_err() {
            self.rollback(handle);
            return Err(AeError::CommandQueueFull);
        }
        log::trace!("Voice {} started at {:?}", handle.slot, tier);
        Ok(handle)
    }

    fn rollback(&mut self, handle: VoiceHandle) {
        let slot = handle.index();
        self.clusters.leave(slot);
        self.lod.deactivate(slot);
        self.voices[slot] = ControlVoice::default();
        let _ = self.pool.release(handle);
    }

    /// Put a Far voice on a bus, claiming (configuring) the bus if needed.
    ///
    /// Callers reserve two command slots first.
    fn join_cluster(&mut self, slot: usize) -> Option<BusId> {
        let voice = &self.voices[slot];
        let key = ClusterKey {
            archetype: voice.archetype?,
            direction: voice.direction,
        };
        let profile = voice.profile.clone()?;
        let assignment = self.clusters.join(slot, key)?;
        if assignment.foreign {
            self.faults.raise(slot, FaultKind::PoolExhaustion);
            log::warn!(
                "All {} far buses taken: slot {} ({}) shares bus {} with another archetype",
                self.clusters.bus_count(),
                slot,
                profile.name,
                assignment.bus
            );
        }
        if assignment.claimed {
            let command = AudioCommand::ConfigureBus {
                bus: assignment.bus,
                profile,
            };
            if self.commands.push(command).is_err() {
                // An unconfigured claim would shape the voice with a stale archetype
                self.clusters.leave(slot);
                log::warn!("Command queue full: slot {} left without a far bus", slot);
                return None;
            }
        }
        Some(assignment.bus)
    }

    /// Stop a voice; its slot is immediately reusable
    pub fn stop_voice(&mut self, handle: VoiceHandle) -> AeResult<()> {
        self.pool.validate(handle)?;
        if self.commands.push(AudioCommand::Stop { slot: handle.slot }).is_err() {
            return Err(AeError::CommandQueueFull);
        }
        let slot = handle.index();
        self.pool.release(handle)?;
        self.lod.deactivate(slot);
        self.clusters.leave(slot);
        self.voices[slot] = ControlVoice::default();
        Ok(())
    }

    /// Re-target a voice from an emotional state
    pub fn update_emotion(&mut self, handle: VoiceHandle, emotion: EmotionState) -> AeResult<()> {
        self.pool.validate(handle)?;
        let slot = handle.index();
        let Some(profile) = &self.voices[slot].profile else {
            return Err(AeError::StaleHandle {
                slot: handle.slot,
                generation: handle.generation,
            });
        };
        let target = profile.target_for(&emotion);
        self.publishers[slot].publish(target);
        Ok(())
    }

    /// Publish a raw target; out-of-range fields are clamped and flagged
    pub fn set_target(&mut self, handle: VoiceHandle, target: AberrationParameters) -> AeResult<()> {
        self.pool.validate(handle)?;
        let (target, clamped) = target.sanitized();
        if clamped {
            self.faults.raise(handle.index(), FaultKind::ParameterRange);
            log::debug!("Target for voice {} clamped into range", handle.slot);
        }
        self.publishers[handle.index()].publish(target);
        Ok(())
    }

    /// Update listener geometry and importance (re-tiered on `tick`)
    pub fn update_position(&mut self, handle: VoiceHandle, distance: f64, direction: f64, importance: f64) -> AeResult<()> {
        self.pool.set_importance(handle, importance)?;
        let slot = handle.index();
        self.lod.update(slot, distance, importance);

        let bucket = self.config.lod.direction_bucket(direction);
        let previous = self.voices[slot].direction;
        if previous == bucket {
            return Ok(());
        }
        if self.lod.tier(slot) != Some(LodTier::Far) {
            self.voices[slot].direction = bucket;
            return Ok(());
        }
        // A bus claim plus the tier command; the bucket is retried on a later update
        if self.commands.slots() < 2 {
            log::debug!("Command queue busy: slot {} keeps its cluster for now", slot);
            return Ok(());
        }

        let placement = self.clusters.placement(slot);
        self.voices[slot].direction = bucket;
        let bus = self.join_cluster(slot);
        let command = AudioCommand::SetTier {
            slot: handle.slot,
            tier: LodTier::Far,
            bus,
        };
        if self.commands.push(command).is_err() {
            self.voices[slot].direction = previous;
            match placement {
                Some((bus, key)) => self.clusters.place(slot, bus, key),
                None => {
                    self.clusters.leave(slot);
                }
            }
            log::warn!("Command queue full: slot {} keeps its previous cluster", slot);
        }
        Ok(())
    }

    /// Periodic control update: drop retired assets, re-evaluate tiers.
    ///
    /// Returns the number of tier changes sent to the audio thread.
    pub fn tick(&mut self, now: Duration) -> usize {
        self.now = now;
        self.collect_garbage();

        let mut changes = std::mem::take(&mut self.changes);
        changes.clear();
        self.lod.evaluate(now, &mut changes);

        let mut sent = 0;
        for change in &changes {
            // A bus claim may precede the tier change
            if self.commands.slots() < 2 {
                self.lod.force_tier(change.slot, change.from);
                log::warn!("Command queue full: tier change for slot {} deferred", change.slot);
                continue;
            }
            let bus = if change.to == LodTier::Far {
                self.join_cluster(change.slot)
            } else {
                self.clusters.leave(change.slot);
                None
            };
            let command = AudioCommand::SetTier {
                slot: change.slot as u32,
                tier: change.to,
                bus,
            };
            if self.commands.push(command).is_ok() {
                sent += 1;
                log::trace!("Voice {} {:?} -> {:?}", change.slot, change.from, change.to);
            }
        }
        self.changes = changes;
        sent
    }

    /// Drop every asset reference the audio thread has retired
    pub fn collect_garbage(&mut self) -> usize {
        self.garbage.drain(drop)
    }

    /// Read and clear a voice's fault flags; a stale handle reads nothing
    pub fn take_faults(&self, handle: VoiceHandle) -> FaultFlags {
        if self.pool.validate(handle).is_err() {
            return FaultFlags::NONE;
        }
        self.faults.take(handle.index())
    }

    pub fn fault_board(&self) -> &Arc<FaultBoard> {
        &self.faults
    }

    pub fn tier(&self, handle: VoiceHandle) -> Option<LodTier> {
        self.pool.validate(handle).ok()?;
        self.lod.tier(handle.index())
    }

    /// Far bus a voice is mixed into
    pub fn bus_of(&self, handle: VoiceHandle) -> Option<BusId> {
        self.pool.validate(handle).ok()?;
        self.clusters.bus_of(handle.index())
    }

    /// Active voices per tier: (near, mid, far)
    pub fn tier_counts(&self) -> (usize, usize, usize) {
        self.lod.counts()
    }

    /// Far buses with at least one member
    pub fn active_buses(&self) -> usize {
        self.clusters.active_buses()
    }

    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO SIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio-thread half of the engine
pub struct AudioRenderer {
    voices: Vec<VoiceInstance>,
    buses: Vec<ClusterBus>,
    voice_bus: Vec<Option<BusId>>,
    commands: QueueConsumer<AudioCommand>,
    garbage: QueueProducer<Retired>,
    faults: Arc<FaultBoard>,
    block_index: u64,
    garbage_overflow: u64,
}

impl AudioRenderer {
    /// Render one block for every voice and bus
    pub fn process_block(&mut self) {
        let _denormals = DenormalGuard::new();

        while let Some(command) = self.commands.pop() {
            self.apply(command);
        }

        for bus in self.buses.iter_mut() {
            bus.clear();
        }

        for slot in 0..self.voices.len() {
            let voice = &mut self.voices[slot];
            if !voice.is_active() {
                continue;
            }
            if voice.plan().per_voice {
                voice.process();
            } else {
                voice.read_anchor();
                if let Some(bus) = self.voice_bus[slot].and_then(|b| self.buses.get_mut(b as usize)) {
                    bus.add(voice.dry(), voice.target());
                }
            }
            let flags = voice.take_faults();
            if !flags.is_empty() {
                self.faults.raise_all(slot, flags);
            }
        }

        let bus_base = self.voices.len();
        for (index, bus) in self.buses.iter_mut().enumerate() {
            if bus.process().is_recovered() {
                self.faults.raise(bus_base + index, FaultKind::FilterState);
            }
        }

        self.block_index += 1;
    }

    fn apply(&mut self, command: AudioCommand) {
        match command {
            AudioCommand::Start { slot, voice, bus } => {
                let slot = slot as usize;
                match self.voices.get_mut(slot) {
                    Some(v) => {
                        let released = v.start(voice);
                        self.voice_bus[slot] = bus;
                        self.retire(released);
                    }
                    None => self.retire(Released {
                        profile: Some(voice.profile),
                        clip: Some(voice.clip),
                    }),
                }
            }
            AudioCommand::Stop { slot } => {
                let slot = slot as usize;
                if let Some(v) = self.voices.get_mut(slot) {
                    let released = v.stop();
                    self.voice_bus[slot] = None;
                    self.retire(released);
                }
            }
            AudioCommand::SetTier { slot, tier, bus } => {
                let slot = slot as usize;
                if let Some(v) = self.voices.get_mut(slot) {
                    v.set_tier(tier);
                    self.voice_bus[slot] = bus;
                }
            }
            AudioCommand::ConfigureBus { bus, profile } => {
                let old = match self.buses.get_mut(bus as usize) {
                    Some(b) => b.configure(profile),
                    None => Some(profile),
                };
                if let Some(old) = old {
                    self.send_garbage(Retired::Profile(old));
                }
            }
        }
    }

    fn retire(&mut self, released: Released) {
        if let Some(profile) = released.profile {
            self.send_garbage(Retired::Profile(profile));
        }
        if let Some(clip) = released.clip {
            self.send_garbage(Retired::Clip(clip));
        }
    }

    #[inline]
    fn send_garbage(&mut self, item: Retired) {
        // Only reachable if the controller stops collecting; the drop then
        // happens here
        if self.garbage.push(item).is_err() {
            self.garbage_overflow += 1;
        }
    }

    /// Output of a Near/Mid voice for the last block
    pub fn voice_output(&self, slot: usize) -> Option<&[Sample]> {
        self.voices
            .get(slot)
            .filter(|v| v.is_active() && v.plan().per_voice)
            .map(|v| v.output())
    }

    /// Output of a cluster bus for the last block
    pub fn bus_output(&self, bus: BusId) -> Option<&[Sample]> {
        self.buses.get(bus as usize).map(|b| b.output())
    }

    /// Sum every voice and bus output of the last block into `out`
    pub fn mix_into(&self, out: &mut [Sample]) {
        out.fill(0.0);
        let voices = self.voices.iter().filter(|v| v.is_active() && v.plan().per_voice).map(|v| v.output());
        let buses = self.buses.iter().map(|b| b.output());
        for block in voices.chain(buses) {
            for (o, &x) in out.iter_mut().zip(block) {
                *o += x;
            }
        }
    }

    /// Blocks rendered so far
    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    /// Retired references that had to be dropped on this thread
    pub fn garbage_overflow(&self) -> u64 {
        self.garbage_overflow
    }

    pub fn voice(&self, slot: usize) -> Option<&VoiceInstance> {
        self.voices.get(slot)
    }

    pub fn voice_mut(&mut self, slot: usize) -> Option<&mut VoiceInstance> {
        self.voices.get_mut(slot)
    }

    /// Bus a Far voice is currently mixed into on this thread
    pub fn voice_bus(&self, slot: usize) -> Option<BusId> {
        self.voice_bus.get(slot).copied().flatten()
    }

    pub fn bus(&self, bus: BusId) -> Option<&ClusterBus> {
        self.buses.get(bus as usize)
    }

    pub fn bus_mut(&mut self, bus: BusId) -> Option<&mut ClusterBus> {
        self.buses.get_mut(bus as usize)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExhaustionPolicy;
    use crate::lod::LodConfig;
    use ae_core::{Archetype, block_rms};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn small_config(max_voices: usize) -> EngineConfig {
        EngineConfig {
            max_voices,
            command_capacity: 64,
            ..EngineConfig::default()
        }
    }

    fn clip(sample_rate: u32) -> Arc<AnchorClip> {
        let samples = (0..sample_rate as usize)
            .map(|i| 0.4 * (2.0 * PI * 125.0 * i as f64 / sample_rate as f64).sin())
            .collect();
        Arc::new(AnchorClip::new(samples, sample_rate).unwrap())
    }

    fn engine(config: EngineConfig) -> (EngineController, AudioRenderer, ArchetypeId) {
        let library = ArchetypeLibrary::with_presets();
        let zombie = library.id_of(Archetype::Zombie.name()).unwrap();
        let (controller, renderer) = AudioEngine::new(config, library).unwrap();
        (controller, renderer, zombie)
    }

    #[test]
    fn test_start_render_stop() {
        let (mut ctl, mut audio, zombie) = engine(small_config(4));
        let handle = ctl
            .start_voice(VoiceRequest::new(zombie, clip(48000)).at(2.0, 0.0).looping(true))
            .unwrap();
        assert_eq!(ctl.tier(handle), Some(LodTier::Near));

        for _ in 0..20 {
            audio.process_block();
        }
        let out = audio.voice_output(handle.index()).unwrap();
        assert!(block_rms(out) > 0.01);
        assert_eq!(audio.block_index(), 20);

        ctl.stop_voice(handle).unwrap();
        audio.process_block();
        assert!(audio.voice_output(handle.index()).is_none());
        // Profile and clip come back for dropping
        assert_eq!(ctl.collect_garbage(), 2);
        assert!(matches!(ctl.stop_voice(handle), Err(AeError::StaleHandle { .. })));
    }

    #[test]
    fn test_request_validation() {
        let (mut ctl, _audio, zombie) = engine(small_config(4));
        let wrong_rate = ctl.start_voice(VoiceRequest::new(zombie, clip(44100)));
        assert!(matches!(wrong_rate, Err(AeError::SampleRateMismatch { anchor: 44100, .. })));
        let unknown = ctl.start_voice(VoiceRequest::new(ArchetypeId(999), clip(48000)));
        assert!(matches!(unknown, Err(AeError::UnknownArchetype(_))));
        assert_eq!(ctl.active_voices(), 0);
    }

    #[test]
    fn test_pool_exhaustion_deny_counts_fault() {
        let (mut ctl, _audio, zombie) = engine(small_config(2));
        let anchor = clip(48000);
        ctl.start_voice(VoiceRequest::new(zombie, anchor.clone())).unwrap();
        ctl.start_voice(VoiceRequest::new(zombie, anchor.clone())).unwrap();
        let denied = ctl.start_voice(VoiceRequest::new(zombie, anchor));
        assert!(matches!(denied, Err(AeError::PoolExhausted { capacity: 2 })));
        assert_eq!(ctl.fault_board().total(FaultKind::PoolExhaustion), 1);
        assert_eq!(ctl.active_voices(), 2);
    }

    #[test]
    fn test_pool_exhaustion_reclaims_least_important() {
        let config = EngineConfig {
            exhaustion_policy: ExhaustionPolicy::ReclaimLeastImportant,
            ..small_config(2)
        };
        let (mut ctl, mut audio, zombie) = engine(config);
        let anchor = clip(48000);
        let minor = ctl
            .start_voice(VoiceRequest::new(zombie, anchor.clone()).importance(0.1))
            .unwrap();
        let major = ctl
            .start_voice(VoiceRequest::new(zombie, anchor.clone()).importance(0.9))
            .unwrap();
        audio.process_block();

        let newcomer = ctl.start_voice(VoiceRequest::new(zombie, anchor).importance(0.5)).unwrap();
        assert_eq!(newcomer.slot, minor.slot);
        assert!(ctl.tier(minor).is_none());
        assert!(ctl.tier(major).is_some());
        assert_eq!(ctl.fault_board().total(FaultKind::PoolExhaustion), 1);

        audio.process_block();
        // The reclaimed voice's assets were retired, not dropped in place
        assert_eq!(ctl.collect_garbage(), 2);
        assert_eq!(audio.garbage_overflow(), 0);
    }

    #[test]
    fn test_set_target_clamps_and_flags() {
        let (mut ctl, mut audio, zombie) = engine(small_config(2));
        let handle = ctl.start_voice(VoiceRequest::new(zombie, clip(48000))).unwrap();
        let mut target = AberrationParameters::neutral();
        target.breathiness = 7.0;
        ctl.set_target(handle, target).unwrap();
        assert!(ctl.take_faults(handle).contains(FaultKind::ParameterRange));

        audio.process_block();
        let voice = audio.voice(handle.index()).unwrap();
        assert_eq!(voice.target().breathiness, 1.0);
    }

    #[test]
    fn test_far_voices_share_buses() {
        let config = EngineConfig {
            lod: LodConfig {
                far_buses: 12,
                ..LodConfig::default()
            },
            command_capacity: 256,
            ..small_config(64)
        };
        let (mut ctl, mut audio, zombie) = engine(config);
        let anchor = clip(48000);
        for i in 0..64 {
            let direction = i as f64 * 0.1;
            ctl.start_voice(VoiceRequest::new(zombie, anchor.clone()).at(100.0, direction).looping(true))
                .unwrap();
        }
        assert_eq!(ctl.tier_counts(), (0, 0, 64));
        assert!(ctl.active_buses() <= 12);

        for _ in 0..10 {
            audio.process_block();
        }
        let mut mix = vec![0.0; 256];
        audio.mix_into(&mut mix);
        assert!(mix.iter().all(|s| s.is_finite()));
        assert!(block_rms(&mix) > 0.0);
    }

    #[test]
    fn test_tick_moves_voice_between_tiers() {
        let (mut ctl, mut audio, zombie) = engine(small_config(4));
        let handle = ctl
            .start_voice(VoiceRequest::new(zombie, clip(48000)).at(3.0, 0.0).looping(true))
            .unwrap();
        audio.process_block();

        ctl.update_position(handle, 80.0, 1.0, 0.0).unwrap();
        assert_eq!(ctl.tick(Duration::from_millis(100)), 0);
        assert_eq!(ctl.tick(Duration::from_millis(600)), 1);
        assert_eq!(ctl.tier(handle), Some(LodTier::Far));
        assert_eq!(ctl.active_buses(), 1);

        audio.process_block();
        assert_eq!(audio.voice(handle.index()).unwrap().tier(), LodTier::Far);
        assert!(audio.voice_output(handle.index()).is_none());

        ctl.update_position(handle, 1.0, 1.0, 0.0).unwrap();
        assert_eq!(ctl.tick(Duration::from_millis(1200)), 1);
        assert_eq!(ctl.active_buses(), 0);
        audio.process_block();
        assert_eq!(audio.voice(handle.index()).unwrap().tier(), LodTier::Near);
    }

    #[test]
    fn test_emotion_changes_target() {
        let (mut ctl, mut audio, zombie) = engine(small_config(2));
        let handle = ctl.start_voice(VoiceRequest::new(zombie, clip(48000))).unwrap();
        audio.process_block();
        let calm = *audio.voice(handle.index()).unwrap().target();

        let angry = EmotionState {
            aggression: 1.0,
            ..EmotionState::default()
        };
        ctl.update_emotion(handle, angry).unwrap();
        audio.process_block();
        let target = *audio.voice(handle.index()).unwrap().target();
        assert!(target.tension >= calm.tension);
        assert!(target.is_valid());
    }

    fn far_request(archetype: ArchetypeId, anchor: &Arc<AnchorClip>, direction: f64) -> VoiceRequest {
        VoiceRequest::new(archetype, Arc::clone(anchor))
            .at(200.0, direction)
            .looping(true)
    }

    #[test]
    fn test_far_voice_reclusters_on_direction_change() {
        let (mut ctl, mut audio, zombie) = engine(small_config(8));
        let anchor = clip(48000);
        let moving = ctl.start_voice(far_request(zombie, &anchor, 0.0)).unwrap();
        let staying = ctl.start_voice(far_request(zombie, &anchor, 0.0)).unwrap();
        let home = ctl.bus_of(moving).unwrap();
        assert_eq!(ctl.bus_of(staying), Some(home));
        audio.process_block();

        ctl.update_position(moving, 200.0, PI, 0.0).unwrap();
        let away = ctl.bus_of(moving).unwrap();
        assert_ne!(away, home);
        assert_eq!(ctl.clusters.members(home), 1);
        assert_eq!(ctl.active_buses(), 2);

        for _ in 0..4 {
            audio.process_block();
        }
        assert_eq!(audio.voice_bus(moving.index()), Some(away));
        assert_eq!(audio.voice_bus(staying.index()), Some(home));
        assert!(audio.bus(away).unwrap().profile().is_some_and(|p| p.name == "zombie"));
        assert!(block_rms(audio.bus_output(away).unwrap()) > 0.0);
        assert!(block_rms(audio.bus_output(home).unwrap()) > 0.0);

        // Back to the original bucket: the existing cluster is found again
        ctl.update_position(moving, 200.0, 0.0, 0.0).unwrap();
        assert_eq!(ctl.bus_of(moving), Some(home));
        assert_eq!(ctl.active_buses(), 1);
        audio.process_block();
        assert_eq!(audio.voice_bus(moving.index()), Some(home));
    }

    #[test]
    fn test_direction_change_waits_for_queue_room() {
        let config = EngineConfig {
            command_capacity: 16,
            ..small_config(32)
        };
        let (mut ctl, mut audio, zombie) = engine(config);
        let anchor = clip(48000);
        let far = ctl.start_voice(far_request(zombie, &anchor, 0.0)).unwrap();
        ctl.start_voice(far_request(zombie, &anchor, 0.0)).unwrap();
        while ctl.commands.slots() > 1 {
            ctl.start_voice(VoiceRequest::new(zombie, anchor.clone()).at(2.0, 0.0)).unwrap();
        }
        let home = ctl.bus_of(far);
        assert!(home.is_some());

        // One free slot cannot carry a bus claim and the tier command
        ctl.update_position(far, 200.0, PI, 0.5).unwrap();
        assert_eq!(ctl.bus_of(far), home);
        audio.process_block();
        assert_eq!(audio.voice_bus(far.index()), home);

        // Retried once the audio thread has drained the queue
        ctl.update_position(far, 200.0, PI, 0.5).unwrap();
        let moved = ctl.bus_of(far);
        assert_ne!(moved, home);
        audio.process_block();
        assert_eq!(audio.voice_bus(far.index()), moved);
        assert_eq!(ctl.active_buses(), 2);
    }

    #[test]
    fn test_archetype_without_free_bus_counts_fault() {
        let mut library = ArchetypeLibrary::new();
        let ids: Vec<_> = (0..13)
            .map(|i| library.insert(ArchetypeProfile::neutral(format!("horde-{}", i), 4)).unwrap())
            .collect();
        let config = EngineConfig {
            lod: LodConfig {
                far_buses: 12,
                ..LodConfig::default()
            },
            ..small_config(16)
        };
        let (mut ctl, _audio) = AudioEngine::new(config, library).unwrap();
        let anchor = clip(48000);

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| ctl.start_voice(far_request(id, &anchor, 0.0)).unwrap())
            .collect();
        assert_eq!(ctl.active_buses(), 12);
        assert_eq!(ctl.fault_board().total(FaultKind::PoolExhaustion), 1);
        assert!(ctl.take_faults(handles[12]).contains(FaultKind::PoolExhaustion));
        for handle in &handles[..12] {
            assert!(ctl.take_faults(*handle).is_empty());
        }
    }

    #[test]
    fn test_reused_slot_starts_without_old_faults() {
        let (mut ctl, mut audio, zombie) = engine(small_config(1));
        let first = ctl.start_voice(VoiceRequest::new(zombie, clip(48000))).unwrap();
        audio.process_block();
        ctl.fault_board().raise(first.index(), FaultKind::FilterState);
        ctl.stop_voice(first).unwrap();

        let second = ctl.start_voice(VoiceRequest::new(zombie, clip(48000))).unwrap();
        assert_eq!(second.slot, first.slot);
        assert!(ctl.take_faults(second).is_empty());
        // Totals keep the history
        assert_eq!(ctl.fault_board().total(FaultKind::FilterState), 1);
    }

    #[test]
    fn test_stale_handle_cannot_take_new_voice_faults() {
        let (mut ctl, mut audio, zombie) = engine(small_config(1));
        let first = ctl.start_voice(VoiceRequest::new(zombie, clip(48000))).unwrap();
        ctl.stop_voice(first).unwrap();
        audio.process_block();
        let second = ctl.start_voice(VoiceRequest::new(zombie, clip(48000))).unwrap();

        ctl.fault_board().raise(second.index(), FaultKind::ParameterRange);
        assert!(ctl.take_faults(first).is_empty());
        assert!(ctl.take_faults(second).contains(FaultKind::ParameterRange));
    }

    #[test]
    fn test_stop_on_full_queue_keeps_voice() {
        let config = EngineConfig {
            command_capacity: 16,
            ..small_config(32)
        };
        let (mut ctl, mut audio, zombie) = engine(config);
        let anchor = clip(48000);
        let mut handles = Vec::new();
        while ctl.commands.slots() > 1 {
            handles.push(ctl.start_voice(VoiceRequest::new(zombie, anchor.clone()).at(2.0, 0.0)).unwrap());
        }
        ctl.stop_voice(handles[0]).unwrap();
        assert!(ctl.commands.is_full());

        let victim = handles[1];
        assert!(matches!(ctl.stop_voice(victim), Err(AeError::CommandQueueFull)));
        assert_eq!(ctl.tier(victim), Some(LodTier::Near));
        assert_eq!(ctl.active_voices(), handles.len() - 1);

        audio.process_block();
        assert!(audio.voice(victim.index()).unwrap().is_active());
        ctl.stop_voice(victim).unwrap();
        audio.process_block();
        assert!(!audio.voice(victim.index()).unwrap().is_active());
    }

    #[test]
    fn test_far_bus_carries_member_emotion() {
        let (mut ctl, mut audio, zombie) = engine(small_config(4));
        let anchor = clip(48000);
        let a = ctl.start_voice(far_request(zombie, &anchor, 0.0)).unwrap();
        let b = ctl.start_voice(far_request(zombie, &anchor, 0.0)).unwrap();
        let bus = ctl.bus_of(a).unwrap();
        audio.process_block();
        let calm = audio.bus(bus).unwrap().target().unwrap();

        let loud = EmotionState {
            intensity: 1.0,
            aggression: 1.0,
            ..EmotionState::default()
        };
        ctl.update_emotion(a, loud).unwrap();
        ctl.update_emotion(b, loud).unwrap();
        audio.process_block();

        let profile = ctl.library().get(zombie).unwrap();
        let expected = profile.target_for(&loud);
        let blended = audio.bus(bus).unwrap().target().unwrap();
        assert_relative_eq!(blended.tension, expected.tension, epsilon = 1e-12);
        assert_relative_eq!(blended.gain_trim_db, expected.gain_trim_db, epsilon = 1e-12);
        assert!(blended.tension >= calm.tension);
    }
}
