//! LOD Manager
//!
//! Bounds total compute by tiering voices:
//! - Near: every module the profile enables, per voice
//! - Mid: formants plus light glottal and subharmonic, per voice
//! - Far: no per-voice chain; the anchor is summed into a shared cluster bus
//!
//! Tier decisions use effective distance (distance shrunk by importance)
//! with separate enter/exit thresholds, a minimum dwell time and periodic
//! evaluation. Tier budgets cap the Near and Mid populations.
//!
//! Runs on the control thread only.

use ae_core::{ArchetypeId, ModuleSet};
use ae_dsp::formant::COARSE_STAGES;
use ae_dsp::glottal::GlottalMode;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::Duration;

/// Smallest supported number of Far-tier buses
pub const MIN_FAR_BUSES: usize = 12;
/// Largest supported number of Far-tier buses
pub const MAX_FAR_BUSES: usize = 24;

/// Processing fidelity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LodTier {
    Near,
    Mid,
    Far,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// LOD configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodConfig {
    /// Effective distance below which a voice becomes Near (m)
    #[serde(default = "default_near_enter")]
    pub near_enter_m: f64,
    /// Effective distance above which a Near voice leaves Near (m)
    #[serde(default = "default_near_exit")]
    pub near_exit_m: f64,
    /// Effective distance below which a Far voice becomes Mid (m)
    #[serde(default = "default_mid_enter")]
    pub mid_enter_m: f64,
    /// Effective distance above which a voice becomes Far (m)
    #[serde(default = "default_mid_exit")]
    pub mid_exit_m: f64,
    /// How strongly importance (0 - 1) shrinks distance
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,
    /// Minimum time between two tier changes of one voice (ms)
    #[serde(default = "default_min_dwell")]
    pub min_dwell_ms: u32,
    /// Minimum time between two evaluations of one voice (ms)
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_ms: u32,
    /// Coarse azimuth buckets used for Far clustering
    #[serde(default = "default_direction_buckets")]
    pub direction_buckets: u16,
    /// Far-tier cluster buses (12 - 24)
    #[serde(default = "default_far_buses")]
    pub far_buses: usize,
    /// Most voices processed at Near fidelity
    #[serde(default = "default_max_near")]
    pub max_near: usize,
    /// Most voices processed at Mid fidelity
    #[serde(default = "default_max_mid")]
    pub max_mid: usize,
}

fn default_near_enter() -> f64 {
    10.0
}
fn default_near_exit() -> f64 {
    12.0
}
fn default_mid_enter() -> f64 {
    35.0
}
fn default_mid_exit() -> f64 {
    40.0
}
fn default_importance_weight() -> f64 {
    1.0
}
fn default_min_dwell() -> u32 {
    500
}
fn default_evaluation_interval() -> u32 {
    100
}
fn default_direction_buckets() -> u16 {
    8
}
fn default_far_buses() -> usize {
    16
}
fn default_max_near() -> usize {
    64
}
fn default_max_mid() -> usize {
    256
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            near_enter_m: 10.0,
            near_exit_m: 12.0,
            mid_enter_m: 35.0,
            mid_exit_m: 40.0,
            importance_weight: 1.0,
            min_dwell_ms: 500,
            evaluation_interval_ms: 100,
            direction_buckets: 8,
            far_buses: 16,
            max_near: 64,
            max_mid: 256,
        }
    }
}

impl LodConfig {
    /// Check thresholds are ordered and counts are usable
    pub fn validate(&self) -> Result<(), String> {
        let finite = [self.near_enter_m, self.near_exit_m, self.mid_enter_m, self.mid_exit_m, self.importance_weight]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err("LOD thresholds must be finite".to_string());
        }
        if !(0.0 < self.near_enter_m && self.near_enter_m < self.near_exit_m) {
            return Err("near_enter_m must be positive and below near_exit_m".to_string());
        }
        if !(self.near_exit_m < self.mid_enter_m && self.mid_enter_m < self.mid_exit_m) {
            return Err("expected near_exit_m < mid_enter_m < mid_exit_m".to_string());
        }
        if self.importance_weight < 0.0 {
            return Err("importance_weight must not be negative".to_string());
        }
        if self.direction_buckets == 0 {
            return Err("direction_buckets must be at least 1".to_string());
        }
        if !(MIN_FAR_BUSES..=MAX_FAR_BUSES).contains(&self.far_buses) {
            return Err(format!(
                "far_buses must be {}-{}, got {}",
                MIN_FAR_BUSES, MAX_FAR_BUSES, self.far_buses
            ));
        }
        Ok(())
    }

    /// Distance shrunk by narrative importance
    #[inline]
    pub fn effective_distance(&self, distance: f64, importance: f64) -> f64 {
        let distance = if distance.is_finite() { distance.max(0.0) } else { f64::MAX };
        let importance = if importance.is_finite() { importance.clamp(0.0, 1.0) } else { 0.0 };
        distance / (1.0 + importance * self.importance_weight)
    }

    /// Tier for a voice with no history
    pub fn initial_tier(&self, effective: f64) -> LodTier {
        if effective < self.near_enter_m {
            LodTier::Near
        } else if effective < self.mid_enter_m {
            LodTier::Mid
        } else {
            LodTier::Far
        }
    }

    /// Tier a voice currently in `current` wants, with hysteresis
    pub fn desired_tier(&self, current: LodTier, effective: f64) -> LodTier {
        match current {
            LodTier::Near => {
                if effective <= self.near_exit_m {
                    LodTier::Near
                } else if effective <= self.mid_exit_m {
                    LodTier::Mid
                } else {
                    LodTier::Far
                }
            }
            LodTier::Mid => {
                if effective < self.near_enter_m {
                    LodTier::Near
                } else if effective <= self.mid_exit_m {
                    LodTier::Mid
                } else {
                    LodTier::Far
                }
            }
            LodTier::Far => self.initial_tier(effective),
        }
    }

    /// Coarse direction bucket for an azimuth in radians
    pub fn direction_bucket(&self, azimuth: f64) -> u16 {
        let buckets = self.direction_buckets.max(1);
        if !azimuth.is_finite() {
            return 0;
        }
        let turn = azimuth.rem_euclid(TAU) / TAU;
        ((turn * buckets as f64) as u16).min(buckets - 1)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIER ASSIGNMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// A tier change decided by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierChange {
    pub slot: usize,
    pub from: LodTier,
    pub to: LodTier,
}

#[derive(Debug, Clone)]
struct LodVoice {
    active: bool,
    tier: LodTier,
    distance: f64,
    importance: f64,
    last_change: Duration,
    last_eval: Duration,
}

impl Default for LodVoice {
    fn default() -> Self {
        Self {
            active: false,
            tier: LodTier::Far,
            distance: 0.0,
            importance: 0.0,
            last_change: Duration::ZERO,
            last_eval: Duration::ZERO,
        }
    }
}

/// Per-voice tier state with hysteresis, dwell and budgets
#[derive(Debug, Clone)]
pub struct LodManager {
    config: LodConfig,
    voices: Vec<LodVoice>,
}

impl LodManager {
    pub fn new(config: LodConfig, capacity: usize) -> Self {
        Self {
            config,
            voices: vec![LodVoice::default(); capacity],
        }
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    /// Register a voice and return its initial tier
    pub fn activate(&mut self, slot: usize, distance: f64, importance: f64, now: Duration) -> LodTier {
        let effective = self.config.effective_distance(distance, importance);
        let tier = self.config.initial_tier(effective);
        if let Some(v) = self.voices.get_mut(slot) {
            *v = LodVoice {
                active: true,
                tier,
                distance,
                importance,
                last_change: now,
                last_eval: now,
            };
        }
        tier
    }

    pub fn deactivate(&mut self, slot: usize) {
        if let Some(v) = self.voices.get_mut(slot) {
            v.active = false;
        }
    }

    pub fn tier(&self, slot: usize) -> Option<LodTier> {
        self.voices.get(slot).filter(|v| v.active).map(|v| v.tier)
    }

    /// Overwrite a voice's tier, e.g. to undo a change that was never delivered
    pub fn force_tier(&mut self, slot: usize, tier: LodTier) {
        if let Some(v) = self.voices.get_mut(slot).filter(|v| v.active) {
            v.tier = tier;
        }
    }

    /// Update a voice's listener distance and importance without re-evaluating
    pub fn update(&mut self, slot: usize, distance: f64, importance: f64) {
        if let Some(v) = self.voices.get_mut(slot) {
            v.distance = distance;
            v.importance = importance;
        }
    }

    /// `assign(voice, distance, importance) -> tier`.
    ///
    /// Re-evaluates at most once per evaluation interval; a change is only
    /// taken once the voice has dwelt in its tier for the minimum time.
    pub fn assign(&mut self, slot: usize, distance: f64, importance: f64, now: Duration) -> LodTier {
        let interval = Duration::from_millis(self.config.evaluation_interval_ms as u64);
        let dwell = Duration::from_millis(self.config.min_dwell_ms as u64);
        let config = &self.config;
        let Some(v) = self.voices.get_mut(slot).filter(|v| v.active) else {
            return LodTier::Far;
        };
        v.distance = distance;
        v.importance = importance;
        if now.saturating_sub(v.last_eval) < interval {
            return v.tier;
        }
        v.last_eval = now;

        let effective = config.effective_distance(distance, importance);
        let desired = config.desired_tier(v.tier, effective);
        if desired != v.tier && now.saturating_sub(v.last_change) >= dwell {
            v.tier = desired;
            v.last_change = now;
        }
        v.tier
    }

    /// Re-evaluate every active voice, then enforce tier budgets.
    ///
    /// Changes are appended to `changes`.
    pub fn evaluate(&mut self, now: Duration, changes: &mut Vec<TierChange>) {
        for slot in 0..self.voices.len() {
            let v = &self.voices[slot];
            if !v.active {
                continue;
            }
            let (from, distance, importance) = (v.tier, v.distance, v.importance);
            let to = self.assign(slot, distance, importance, now);
            if to != from {
                changes.push(TierChange { slot, from, to });
            }
        }
        self.enforce_budget(LodTier::Near, LodTier::Mid, self.config.max_near, now, changes);
        self.enforce_budget(LodTier::Mid, LodTier::Far, self.config.max_mid, now, changes);
    }

    /// Demote the least deserving voices of `tier` until at most `budget` remain
    fn enforce_budget(&mut self, tier: LodTier, demote_to: LodTier, budget: usize, now: Duration, changes: &mut Vec<TierChange>) {
        let mut members: Vec<(usize, f64)> = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.active && v.tier == tier)
            .map(|(i, v)| (i, self.config.effective_distance(v.distance, v.importance)))
            .collect();
        if members.len() <= budget {
            return;
        }
        // Closest effective distance keeps its tier
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        for &(slot, _) in &members[budget..] {
            let v = &mut self.voices[slot];
            v.tier = demote_to;
            v.last_change = now;
            match changes.iter_mut().find(|c| c.slot == slot) {
                Some(change) => change.to = demote_to,
                None => changes.push(TierChange {
                    slot,
                    from: tier,
                    to: demote_to,
                }),
            }
        }
        changes.retain(|c| c.from != c.to);
    }

    /// Active voices per tier: (near, mid, far)
    pub fn counts(&self) -> (usize, usize, usize) {
        self.voices
            .iter()
            .filter(|v| v.active)
            .fold((0, 0, 0), |(n, m, f), v| match v.tier {
                LodTier::Near => (n + 1, m, f),
                LodTier::Mid => (n, m + 1, f),
                LodTier::Far => (n, m, f + 1),
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAR CLUSTERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Index of a Far-tier cluster bus
pub type BusId = u16;

/// Far-tier clustering key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub archetype: ArchetypeId,
    pub direction: u16,
}

/// Outcome of joining a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusAssignment {
    pub bus: BusId,
    /// The bus was idle and has just been claimed for this key
    pub claimed: bool,
    /// Every bus was taken and none serves this archetype; the voice is
    /// shaped by another archetype's profile
    pub foreign: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct BusSlot {
    key: Option<ClusterKey>,
    members: usize,
}

/// Assignment of Far voices to a fixed number of shared buses
#[derive(Debug, Clone)]
pub struct ClusterMap {
    buses: Vec<BusSlot>,
    direction_buckets: u16,
    voice_bus: Vec<Option<BusId>>,
}

impl ClusterMap {
    pub fn new(bus_count: usize, direction_buckets: u16, capacity: usize) -> Self {
        Self {
            buses: vec![BusSlot::default(); bus_count],
            direction_buckets: direction_buckets.max(1),
            voice_bus: vec![None; capacity],
        }
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    /// Buses with at least one member
    pub fn active_buses(&self) -> usize {
        self.buses.iter().filter(|b| b.members > 0).count()
    }

    pub fn bus_of(&self, slot: usize) -> Option<BusId> {
        self.voice_bus.get(slot).copied().flatten()
    }

    pub fn members(&self, bus: BusId) -> usize {
        self.buses.get(bus as usize).map_or(0, |b| b.members)
    }

    pub fn key(&self, bus: BusId) -> Option<ClusterKey> {
        self.buses.get(bus as usize).and_then(|b| b.key)
    }

    fn direction_gap(&self, a: u16, b: u16) -> u16 {
        let d = a.abs_diff(b);
        d.min(self.direction_buckets - d.min(self.direction_buckets))
    }

    /// Put a voice on a bus.
    ///
    /// Preference order: the bus already serving `key`, an idle bus, the
    /// same-archetype bus with the nearest direction, the least loaded bus.
    pub fn join(&mut self, slot: usize, key: ClusterKey) -> Option<BusAssignment> {
        if slot >= self.voice_bus.len() || self.buses.is_empty() {
            return None;
        }
        self.leave(slot);

        let (index, claimed, foreign) = if let Some(i) = self.buses.iter().position(|b| b.key == Some(key)) {
            (i, false, false)
        } else if let Some(i) = self.buses.iter().position(|b| b.members == 0) {
            self.buses[i].key = Some(key);
            (i, true, false)
        } else if let Some(i) = self
            .buses
            .iter()
            .enumerate()
            .filter(|(_, b)| b.key.is_some_and(|k| k.archetype == key.archetype))
            .min_by_key(|(_, b)| b.key.map_or(u16::MAX, |k| self.direction_gap(k.direction, key.direction)))
            .map(|(i, _)| i)
        {
            (i, false, false)
        } else {
            let i = self
                .buses
                .iter()
                .enumerate()
                .min_by_key(|(_, b)| b.members)
                .map_or(0, |(i, _)| i);
            (i, false, true)
        };

        self.buses[index].members += 1;
        let bus = index as BusId;
        self.voice_bus[slot] = Some(bus);
        Some(BusAssignment { bus, claimed, foreign })
    }

    /// Current bus of a voice together with that bus's key
    pub fn placement(&self, slot: usize) -> Option<(BusId, ClusterKey)> {
        let bus = self.bus_of(slot)?;
        Some((bus, self.key(bus)?))
    }

    /// Put a voice back on a known bus, restoring the bus key if the bus
    /// went idle in between
    pub fn place(&mut self, slot: usize, bus: BusId, key: ClusterKey) {
        if slot >= self.voice_bus.len() || bus as usize >= self.buses.len() {
            return;
        }
        self.leave(slot);
        let b = &mut self.buses[bus as usize];
        if b.members == 0 {
            b.key = Some(key);
        }
        b.members += 1;
        self.voice_bus[slot] = Some(bus);
    }

    /// Remove a voice from its bus; an emptied bus becomes idle
    pub fn leave(&mut self, slot: usize) -> Option<BusId> {
        let bus = self.voice_bus.get_mut(slot)?.take()?;
        let b = &mut self.buses[bus as usize];
        b.members = b.members.saturating_sub(1);
        if b.members == 0 {
            b.key = None;
        }
        Some(bus)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSING PLAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Module flags resolved once per tier change, read once per block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingPlan {
    /// Run the per-voice chain at all (false for Far)
    pub per_voice: bool,
    pub formant_stages: usize,
    pub glottal: GlottalMode,
    pub subharmonic: bool,
    pub breath: bool,
    pub noise: bool,
}

impl ProcessingPlan {
    pub const FAR: Self = Self {
        per_voice: false,
        formant_stages: COARSE_STAGES,
        glottal: GlottalMode::Off,
        subharmonic: false,
        breath: false,
        noise: false,
    };

    pub fn resolve(modules: &ModuleSet, tier: LodTier) -> Self {
        match tier {
            LodTier::Near => Self {
                per_voice: true,
                formant_stages: ae_core::MAX_FORMANT_BANDS,
                glottal: if modules.glottal { GlottalMode::Full } else { GlottalMode::Off },
                subharmonic: modules.subharmonic,
                breath: modules.breath,
                noise: modules.noise,
            },
            LodTier::Mid => Self {
                per_voice: true,
                formant_stages: ae_core::MAX_FORMANT_BANDS,
                glottal: if modules.glottal { GlottalMode::Light } else { GlottalMode::Off },
                subharmonic: modules.subharmonic,
                breath: false,
                noise: false,
            },
            LodTier::Far => Self::FAR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_effective_distance_uses_importance() {
        let config = LodConfig::default();
        assert_relative_eq!(config.effective_distance(20.0, 0.0), 20.0);
        assert_relative_eq!(config.effective_distance(20.0, 1.0), 10.0);
        let weighted = LodConfig {
            importance_weight: 3.0,
            ..LodConfig::default()
        };
        assert_relative_eq!(weighted.effective_distance(20.0, 0.5), 8.0, epsilon = 1e-12);
        assert_eq!(config.effective_distance(f64::NAN, 0.0), f64::MAX);
    }

    #[test]
    fn test_hysteresis_between_thresholds() {
        let config = LodConfig::default();
        // 11 m: inside the Near band for a Near voice, not enough to enter Near
        assert_eq!(config.desired_tier(LodTier::Near, 11.0), LodTier::Near);
        assert_eq!(config.desired_tier(LodTier::Mid, 11.0), LodTier::Mid);
        assert_eq!(config.desired_tier(LodTier::Mid, 38.0), LodTier::Mid);
        assert_eq!(config.desired_tier(LodTier::Far, 38.0), LodTier::Far);
        assert_eq!(config.desired_tier(LodTier::Near, 50.0), LodTier::Far);
    }

    #[test]
    fn test_boundary_oscillation_respects_dwell() {
        let config = LodConfig {
            evaluation_interval_ms: 0,
            ..LodConfig::default()
        };
        let dwell = config.min_dwell_ms as u64;
        let mut lod = LodManager::new(config, 1);
        lod.activate(0, 5.0, 0.0, ms(0));

        // Distance flips across both Near thresholds every 10 ms for 5 s
        let mut changes = Vec::new();
        let mut last_tier = LodTier::Near;
        for step in 1..=500u64 {
            let distance = if step % 2 == 0 { 9.0 } else { 13.0 };
            let now = ms(step * 10);
            let tier = lod.assign(0, distance, 0.0, now);
            if tier != last_tier {
                changes.push(now);
                last_tier = tier;
            }
        }
        assert!(!changes.is_empty());
        for pair in changes.windows(2) {
            assert!(pair[1] - pair[0] >= ms(dwell), "changed twice within {:?}", pair[1] - pair[0]);
        }
    }

    #[test]
    fn test_evaluation_interval_defers_changes() {
        let mut lod = LodManager::new(LodConfig::default(), 1);
        lod.activate(0, 5.0, 0.0, ms(0));
        // Moved far away, but dwell and interval have not elapsed
        assert_eq!(lod.assign(0, 100.0, 0.0, ms(50)), LodTier::Near);
        assert_eq!(lod.assign(0, 100.0, 0.0, ms(600)), LodTier::Far);
    }

    #[test]
    fn test_budget_demotes_farthest() {
        let config = LodConfig {
            max_near: 2,
            ..LodConfig::default()
        };
        let mut lod = LodManager::new(config, 4);
        for (slot, d) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
            lod.activate(slot, d, 0.0, ms(0));
        }
        let mut changes = Vec::new();
        lod.evaluate(ms(1000), &mut changes);
        assert_eq!(lod.counts(), (2, 2, 0));
        assert_eq!(lod.tier(0), Some(LodTier::Near));
        assert_eq!(lod.tier(3), Some(LodTier::Mid));
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_importance_keeps_voice_near_under_budget() {
        let config = LodConfig {
            max_near: 1,
            ..LodConfig::default()
        };
        let mut lod = LodManager::new(config, 2);
        lod.activate(0, 4.0, 0.0, ms(0));
        lod.activate(1, 6.0, 1.0, ms(0)); // effective 3 m
        let mut changes = Vec::new();
        lod.evaluate(ms(1000), &mut changes);
        assert_eq!(lod.tier(1), Some(LodTier::Near));
        assert_eq!(lod.tier(0), Some(LodTier::Mid));
    }

    #[test]
    fn test_cluster_join_prefers_key_then_idle_then_archetype() {
        let mut map = ClusterMap::new(2, 8, 8);
        let a0 = ClusterKey {
            archetype: ArchetypeId(0),
            direction: 0,
        };
        let a3 = ClusterKey {
            archetype: ArchetypeId(0),
            direction: 3,
        };
        let b5 = ClusterKey {
            archetype: ArchetypeId(1),
            direction: 5,
        };

        let first = map.join(0, a0).unwrap();
        assert!(first.claimed);
        assert_eq!(
            map.join(1, a0).unwrap(),
            BusAssignment {
                bus: first.bus,
                claimed: false,
                foreign: false
            }
        );
        let second = map.join(2, b5).unwrap();
        assert!(second.claimed);
        assert_ne!(second.bus, first.bus);

        // No idle bus left: same archetype wins over load
        let nearest = map.join(3, a3).unwrap();
        assert_eq!(nearest.bus, first.bus);
        assert!(!nearest.foreign);
        assert_eq!(map.members(first.bus), 3);

        for slot in [0, 1, 3] {
            map.leave(slot);
        }
        assert_eq!(map.key(first.bus), None);
        assert_eq!(map.active_buses(), 1);
    }

    #[test]
    fn test_unknown_archetype_on_full_map_is_marked_foreign() {
        let mut map = ClusterMap::new(2, 8, 8);
        let key = |archetype, direction| ClusterKey {
            archetype: ArchetypeId(archetype),
            direction,
        };
        map.join(0, key(0, 0)).unwrap();
        map.join(1, key(0, 0)).unwrap();
        let other = map.join(2, key(1, 4)).unwrap();

        let third = map.join(3, key(2, 1)).unwrap();
        assert!(third.foreign);
        assert!(!third.claimed);
        // Least loaded bus
        assert_eq!(third.bus, other.bus);
        assert_eq!(map.key(third.bus), Some(key(1, 4)));
    }

    #[test]
    fn test_place_restores_previous_bus_and_key() {
        let mut map = ClusterMap::new(4, 8, 8);
        let home = ClusterKey {
            archetype: ArchetypeId(0),
            direction: 2,
        };
        let away = ClusterKey {
            archetype: ArchetypeId(0),
            direction: 6,
        };
        let first = map.join(0, home).unwrap();
        map.join(1, home).unwrap();
        let saved = map.placement(0).unwrap();
        assert_eq!(saved, (first.bus, home));

        // Moving to another bus and back
        let moved = map.join(0, away).unwrap();
        assert!(moved.claimed);
        assert_ne!(moved.bus, first.bus);
        map.place(0, saved.0, saved.1);
        assert_eq!(map.bus_of(0), Some(first.bus));
        assert_eq!(map.members(first.bus), 2);
        assert_eq!(map.key(moved.bus), None);

        // A sole member empties its bus; the key comes back with it
        map.leave(1);
        let moved = map.join(0, away).unwrap();
        assert_eq!(map.key(moved.bus), Some(away));
        map.place(0, saved.0, saved.1);
        assert_eq!(map.key(first.bus), Some(home));
        assert_eq!(map.active_buses(), 1);
    }

    #[test]
    fn test_direction_buckets_wrap() {
        let config = LodConfig::default();
        assert_eq!(config.direction_bucket(0.0), 0);
        assert_eq!(config.direction_bucket(TAU - 1e-9), 7);
        assert_eq!(config.direction_bucket(-0.1), 7);
        assert_eq!(config.direction_bucket(std::f64::consts::PI), 4);
    }

    #[test]
    fn test_plan_per_tier() {
        let near = ProcessingPlan::resolve(&ModuleSet::ALL, LodTier::Near);
        assert_eq!(near.glottal, GlottalMode::Full);
        assert!(near.noise && near.breath);

        let mid = ProcessingPlan::resolve(&ModuleSet::ALL, LodTier::Mid);
        assert_eq!(mid.glottal, GlottalMode::Light);
        assert!(mid.subharmonic && !mid.noise && !mid.breath);

        let no_sub = ModuleSet {
            subharmonic: false,
            ..ModuleSet::ALL
        };
        assert!(!ProcessingPlan::resolve(&no_sub, LodTier::Near).subharmonic);
        assert!(!ProcessingPlan::resolve(&ModuleSet::ALL, LodTier::Far).per_voice);
    }

    #[test]
    fn test_config_validation() {
        assert!(LodConfig::default().validate().is_ok());
        let bad = LodConfig {
            far_buses: 40,
            ..LodConfig::default()
        };
        assert!(bad.validate().is_err());
        let inverted = LodConfig {
            near_exit_m: 5.0,
            ..LodConfig::default()
        };
        assert!(inverted.validate().is_err());
    }
}
