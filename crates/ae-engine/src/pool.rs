//! Voice pool (control side)
//!
//! Fixed number of slots, allocated once. Handles carry a generation so a
//! handle to a recycled slot is rejected instead of steering the new voice.

use ae_core::{AeError, AeResult};

use crate::config::ExhaustionPolicy;

/// Handle to a live voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle {
    pub slot: u32,
    pub generation: u32,
}

impl VoiceHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.slot as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PoolSlot {
    generation: u32,
    active: bool,
    importance: f64,
    /// Allocation order, used to break importance ties (oldest goes first)
    serial: u64,
}

/// Result of a successful allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub handle: VoiceHandle,
    /// Voice that was stopped to make room
    pub reclaimed: Option<VoiceHandle>,
}

/// Slot allocator with generation-checked handles
#[derive(Debug, Clone)]
pub struct VoicePool {
    slots: Vec<PoolSlot>,
    free: Vec<u32>,
    serial: u64,
}

impl VoicePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![PoolSlot::default(); capacity],
            // Pop from the back hands out slot 0 first
            free: (0..capacity as u32).rev().collect(),
            serial: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Reserve a slot, reclaiming one if the policy allows
    pub fn allocate(&mut self, importance: f64, policy: ExhaustionPolicy) -> AeResult<Allocation> {
        let importance = if importance.is_finite() { importance.clamp(0.0, 1.0) } else { 0.0 };
        let mut reclaimed = None;

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => match policy {
                ExhaustionPolicy::Deny => {
                    return Err(AeError::PoolExhausted {
                        capacity: self.capacity(),
                    });
                }
                ExhaustionPolicy::ReclaimLeastImportant => {
                    let victim = self.least_important().ok_or(AeError::PoolExhausted {
                        capacity: self.capacity(),
                    })?;
                    reclaimed = Some(victim);
                    self.retire(victim.slot);
                    victim.slot
                }
            },
        };

        self.serial += 1;
        let entry = &mut self.slots[slot as usize];
        entry.generation = entry.generation.wrapping_add(1);
        entry.active = true;
        entry.importance = importance;
        entry.serial = self.serial;

        Ok(Allocation {
            handle: VoiceHandle {
                slot,
                generation: entry.generation,
            },
            reclaimed,
        })
    }

    /// Check a handle still names a live voice
    pub fn validate(&self, handle: VoiceHandle) -> AeResult<()> {
        match self.slots.get(handle.index()) {
            Some(s) if s.active && s.generation == handle.generation => Ok(()),
            _ => Err(AeError::StaleHandle {
                slot: handle.slot,
                generation: handle.generation,
            }),
        }
    }

    /// Free a live voice's slot
    pub fn release(&mut self, handle: VoiceHandle) -> AeResult<()> {
        self.validate(handle)?;
        self.retire(handle.slot);
        self.free.push(handle.slot);
        Ok(())
    }

    pub fn set_importance(&mut self, handle: VoiceHandle, importance: f64) -> AeResult<()> {
        self.validate(handle)?;
        self.slots[handle.index()].importance = if importance.is_finite() { importance.clamp(0.0, 1.0) } else { 0.0 };
        Ok(())
    }

    /// Handle for an active slot
    pub fn handle(&self, slot: usize) -> Option<VoiceHandle> {
        self.slots.get(slot).filter(|s| s.active).map(|s| VoiceHandle {
            slot: slot as u32,
            generation: s.generation,
        })
    }

    /// Handles of all active voices
    pub fn active(&self) -> impl Iterator<Item = VoiceHandle> + '_ {
        (0..self.slots.len()).filter_map(|i| self.handle(i))
    }

    fn retire(&mut self, slot: u32) {
        if let Some(s) = self.slots.get_mut(slot as usize) {
            s.active = false;
        }
    }

    fn least_important(&self) -> Option<VoiceHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.active)
            .min_by(|(_, a), (_, b)| a.importance.total_cmp(&b.importance).then(a.serial.cmp(&b.serial)))
            .map(|(i, s)| VoiceHandle {
                slot: i as u32,
                generation: s.generation,
            })
    }
}
