//! Fault board
//!
//! Shared (`Arc`) diagnostics surface. The audio thread raises per-voice
//! flags and bumps per-kind totals with relaxed atomic RMWs; the control
//! thread takes and clears them. No locks, no allocation after creation.

use ae_core::{FaultFlags, FaultKind};
use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicU8, AtomicU64, Ordering};

/// Fault counts per kind since creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultTotals {
    pub parameter_range: u64,
    pub filter_state: u64,
    pub pool_exhaustion: u64,
}

impl FaultTotals {
    pub fn get(&self, kind: FaultKind) -> u64 {
        match kind {
            FaultKind::ParameterRange => self.parameter_range,
            FaultKind::FilterState => self.filter_state,
            FaultKind::PoolExhaustion => self.pool_exhaustion,
        }
    }

    pub fn sum(&self) -> u64 {
        self.parameter_range + self.filter_state + self.pool_exhaustion
    }
}

pub struct FaultBoard {
    slots: Box<[AtomicU8]>,
    totals: [CachePadded<AtomicU64>; FaultKind::COUNT],
}

impl FaultBoard {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| AtomicU8::new(0)).collect(),
            totals: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(0))),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Raise a fault against a voice slot
    #[inline]
    pub fn raise(&self, slot: usize, kind: FaultKind) {
        if let Some(flags) = self.slots.get(slot) {
            flags.fetch_or(kind.bit(), Ordering::Relaxed);
        }
        self.count(kind);
    }

    /// Raise every fault in `flags` against a voice slot
    #[inline]
    pub fn raise_all(&self, slot: usize, flags: FaultFlags) {
        for kind in flags.iter() {
            self.raise(slot, kind);
        }
    }

    /// Count a fault not tied to a voice slot
    #[inline]
    pub fn count(&self, kind: FaultKind) {
        self.totals[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Read and clear a slot's flags
    pub fn take(&self, slot: usize) -> FaultFlags {
        self.slots
            .get(slot)
            .map_or(FaultFlags::NONE, |f| FaultFlags::from_bits(f.swap(0, Ordering::Relaxed)))
    }

    /// Read a slot's flags without clearing
    pub fn peek(&self, slot: usize) -> FaultFlags {
        self.slots
            .get(slot)
            .map_or(FaultFlags::NONE, |f| FaultFlags::from_bits(f.load(Ordering::Relaxed)))
    }

    pub fn total(&self, kind: FaultKind) -> u64 {
        self.totals[kind.index()].load(Ordering::Relaxed)
    }

    pub fn totals(&self) -> FaultTotals {
        FaultTotals {
            parameter_range: self.total(FaultKind::ParameterRange),
            filter_state: self.total(FaultKind::FilterState),
            pool_exhaustion: self.total(FaultKind::PoolExhaustion),
        }
    }

    /// Slots with any flag raised
    pub fn faulted_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, f)| f.load(Ordering::Relaxed) != 0)
            .map(|(i, _)| i)
    }
}
