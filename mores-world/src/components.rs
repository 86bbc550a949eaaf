//! Per-entity components of the reference host.
//!
//! Every entity (society root or member) carries its engine state
//! ([`EntityRuntime`]) plus whichever stores gameplay gave it. A missing
//! store is `None`; effects that need it miss instead of creating it.

use mores_core::effects::{Health, IntentBuffer, RelationshipBuffer, ValueBuffer, ValueStore};
use mores_core::{EntityId, EntityRuntime, SimTime};

/// Stores effects can read and write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStores {
    /// Needs; effects only adjust existing entries.
    pub needs: Option<ValueBuffer>,
    /// Resources; entries are created on first write.
    pub resources: Option<ValueBuffer>,
    /// Reputation standings; entries are created on first write.
    pub reputation: Option<ValueBuffer>,
    /// Cohesion scalar, usually carried by society roots.
    pub cohesion: Option<f32>,
    /// Health.
    pub health: Option<Health>,
    /// Affinities towards other entities.
    pub relationships: Option<RelationshipBuffer>,
    /// Intent urgencies.
    pub intents: Option<IntentBuffer>,
}

impl EntityStores {
    /// The keyed buffer backing `store`.
    #[must_use]
    pub fn values(&self, store: ValueStore) -> Option<&ValueBuffer> {
        match store {
            ValueStore::Needs => self.needs.as_ref(),
            ValueStore::Resources => self.resources.as_ref(),
            ValueStore::Reputation => self.reputation.as_ref(),
        }
    }

    /// Mutable form of [`EntityStores::values`].
    pub fn values_mut(&mut self, store: ValueStore) -> Option<&mut ValueBuffer> {
        match store {
            ValueStore::Needs => self.needs.as_mut(),
            ValueStore::Resources => self.resources.as_mut(),
            ValueStore::Reputation => self.reputation.as_mut(),
        }
    }
}

/// One simulated entity.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// Engine state: accumulators, timers, cooldowns, seed.
    pub runtime: EntityRuntime,
    /// Gameplay stores.
    pub stores: EntityStores,
}

impl EntityRecord {
    /// Record with empty stores.
    #[must_use]
    pub fn new(runtime: EntityRuntime) -> Self {
        Self {
            runtime,
            stores: EntityStores::default(),
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.runtime.entity()
    }

    /// Whether this entity is a society root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.runtime.entity() == self.runtime.society_root()
    }
}

/// Bookkeeping for one society.
#[derive(Debug, Clone, PartialEq)]
pub struct SocietyRecord {
    /// Root entity id.
    pub root: EntityId,
    /// Profile the society was spawned with. `None`, or an id with no
    /// compiled mask, means the whole library is enabled.
    pub profile: Option<String>,
    /// Members in spawn order.
    pub members: Vec<EntityId>,
    /// Time the society's clock read at the last tick (or spawn).
    pub now: SimTime,
}

impl SocietyRecord {
    /// New society with no members.
    #[must_use]
    pub fn new(root: EntityId, profile: Option<String>, now: SimTime) -> Self {
        Self {
            root,
            profile,
            members: Vec::new(),
            now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_stores_route_by_kind() {
        let mut stores = EntityStores {
            resources: Some(ValueBuffer::new().with("gold", 3.0)),
            ..EntityStores::default()
        };
        assert!(stores.values(ValueStore::Needs).is_none());
        assert_eq!(stores.values(ValueStore::Resources).and_then(|b| b.get("gold")), Some(3.0));
        if let Some(b) = stores.values_mut(ValueStore::Resources) {
            b.set("gold", 1.0);
        }
        assert_eq!(stores.resources.and_then(|b| b.get("gold")), Some(1.0));
    }
}
