//! Fault taxonomy
//!
//! Faults are contained and recovered locally on the audio thread. They are
//! only *reported* outward as flags; they never stop processing.

use serde::{Deserialize, Serialize};

/// Kind of locally-recovered fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Incoming target parameter outside its valid range (clamped)
    ParameterRange,
    /// NaN/Inf found in filter or module state (state zeroed)
    FilterState,
    /// Voice requested with no free pool slot
    PoolExhaustion,
}

impl FaultKind {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::ParameterRange, Self::FilterState, Self::PoolExhaustion];

    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            Self::ParameterRange => 1 << 0,
            Self::FilterState => 1 << 1,
            Self::PoolExhaustion => 1 << 2,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::ParameterRange => 0,
            Self::FilterState => 1,
            Self::PoolExhaustion => 2,
        }
    }
}

/// Set of raised faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FaultFlags(u8);

impl FaultFlags {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn raise(&mut self, kind: FaultKind) {
        self.0 |= kind.bit();
    }

    #[inline]
    pub const fn contains(self, kind: FaultKind) -> bool {
        self.0 & kind.bit() != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Take the flags, leaving this set empty
    #[inline]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn iter(self) -> impl Iterator<Item = FaultKind> {
        FaultKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl From<FaultKind> for FaultFlags {
    fn from(kind: FaultKind) -> Self {
        Self(kind.bit())
    }
}

impl std::ops::BitOr for FaultFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FaultFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
