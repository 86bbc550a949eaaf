//! Per-society time source.
//!
//! Societies may run on separate clocks (a distant town ticking at a coarser
//! rate, a paused region). The world asks the clock once per tick per
//! society root and uses that time for every entity in the society.

use std::collections::BTreeMap;

use mores_core::{EntityId, SimTime};

/// Supplies the current time of a society.
pub trait SocietyClock: Sync {
    /// Current time for the society rooted at `society_root`.
    fn now(&self, society_root: EntityId) -> SimTime;
}

impl<F> SocietyClock for F
where
    F: Fn(EntityId) -> SimTime + Sync,
{
    fn now(&self, society_root: EntityId) -> SimTime {
        self(society_root)
    }
}

/// One time shared by every society, with optional per-society offsets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixedClock {
    now: SimTime,
    offsets: BTreeMap<EntityId, SimTime>,
}

impl FixedClock {
    /// Clock reading `now`.
    #[must_use]
    pub fn new(now: SimTime) -> Self {
        Self {
            now,
            offsets: BTreeMap::new(),
        }
    }

    /// Shared time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.now
    }

    /// Jump to `now`.
    pub fn set(&mut self, now: SimTime) {
        self.now = now;
    }

    /// Advance by `dt` seconds.
    pub fn advance(&mut self, dt: SimTime) {
        self.now += dt;
    }

    /// Shift one society's clock by `offset` seconds.
    pub fn set_offset(&mut self, society_root: EntityId, offset: SimTime) {
        self.offsets.insert(society_root, offset);
    }
}

impl SocietyClock for FixedClock {
    fn now(&self, society_root: EntityId) -> SimTime {
        self.now + self.offsets.get(&society_root).copied().unwrap_or(0.0)
    }
}
