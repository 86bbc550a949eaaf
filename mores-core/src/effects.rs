//! Effect applier.
//!
//! The evaluator turns fired rules into [`EffectCommand`]s; [`apply`] turns
//! one command into a mutation through an [`EffectHost`]. Hosts own every
//! store touched here (needs, resources, reputation, cohesion, health,
//! relationships, intents) plus the signal queue and schedule outbox.
//!
//! A target that lacks the store an effect needs is a miss, not an error.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::definition::EffectType;
use crate::library::{CompiledEffect, RuntimeLibrary};
use crate::types::{clamp01, EntityId, LibIndex, SimTime};

// ---------------------------------------------------------------------------
// Commands and messages
// ---------------------------------------------------------------------------

/// One effect to apply, buffered during the parallel evaluation phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectCommand {
    /// Effect index.
    pub effect: LibIndex,
    /// Rule that fired.
    pub rule: LibIndex,
    /// Authored rule-effect weight. Carried for consumers that scale
    /// intensity; it does not gate application.
    pub weight: f32,
    /// Normalized sample that fired the rule.
    pub normalized: f32,
    /// Entity the metric belongs to.
    pub subject: EntityId,
    /// Resolved target entity.
    pub target: EntityId,
    /// Society root of `subject`.
    pub society_root: EntityId,
    /// Context id of the triggering observation.
    pub context: Option<String>,
    /// Time the rule fired.
    pub time: SimTime,
}

/// A signal raised by an `EmitSignal` effect.
///
/// Hosts queue it and observe it on a later tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Signal index.
    pub signal: LibIndex,
    /// `magnitude * normalized`.
    pub value: f32,
    /// Subject of the firing rule.
    pub subject: EntityId,
    /// Resolved target.
    pub target: EntityId,
    /// Society root.
    pub society_root: EntityId,
    /// Context id carried over from the trigger.
    pub context: Option<String>,
    /// Emission time.
    pub time: SimTime,
}

/// Request for the external schedule system to switch an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    /// Entity whose schedule changes.
    pub entity: EntityId,
    /// Activity to switch to.
    pub activity_id: String,
    /// Seconds the override lasts.
    pub duration: f32,
    /// Request time.
    pub time: SimTime,
}

/// Result of applying one command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectOutcome {
    /// A stored value changed (or was rewritten with the same value).
    Changed {
        /// Value before the effect.
        before: f32,
        /// Value after the effect.
        after: f32,
    },
    /// A message was handed to the host (signal or schedule override).
    Dispatched,
    /// The target lacked the needed store, or the effect was a no-op.
    Missed,
}

impl EffectOutcome {
    /// Whether anything happened.
    #[must_use]
    pub fn is_applied(self) -> bool {
        !matches!(self, Self::Missed)
    }
}

// ---------------------------------------------------------------------------
// Host boundary
// ---------------------------------------------------------------------------

/// Keyed value stores an effect can modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueStore {
    /// Needs; entries must already exist.
    Needs,
    /// Resources; entries are created on first write.
    Resources,
    /// Reputation; entries are created on first write.
    Reputation,
}

impl ValueStore {
    /// Whether writing to a missing key creates it.
    #[must_use]
    pub fn creates_entries(self) -> bool {
        !matches!(self, Self::Needs)
    }
}

/// State of one keyed slot on a host entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    /// The entity has no such store at all.
    NoStore,
    /// The store exists but has no entry for the key.
    Vacant,
    /// Current value.
    Occupied(f32),
}

/// Current and maximum health of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Health {
    /// Current health.
    pub current: f32,
    /// Maximum health; health deltas are scaled by it.
    pub max: f32,
}

/// Boundary to the stores owned by other subsystems.
pub trait EffectHost {
    /// Read a keyed value.
    fn value(&self, store: ValueStore, entity: EntityId, key: &str) -> Slot;
    /// Write a keyed value. Only called when the store exists.
    fn set_value(&mut self, store: ValueStore, entity: EntityId, key: &str, value: f32);

    /// Society cohesion scalar, if the entity carries one.
    fn cohesion(&self, entity: EntityId) -> Option<f32>;
    /// Write cohesion.
    fn set_cohesion(&mut self, entity: EntityId, value: f32);

    /// Health, if the entity has any.
    fn health(&self, entity: EntityId) -> Option<Health>;
    /// Write current health.
    fn set_health(&mut self, entity: EntityId, current: f32);

    /// Affinity `subject` holds towards `other`.
    fn relationship(&self, subject: EntityId, other: EntityId) -> Slot;
    /// Write affinity, creating the entry if needed.
    fn set_relationship(&mut self, subject: EntityId, other: EntityId, affinity: f32);

    /// Urgency of one intent.
    fn intent(&self, entity: EntityId, key: &IntentKey) -> Slot;
    /// Write urgency, creating the entry if needed.
    fn set_intent(&mut self, entity: EntityId, key: IntentKey, urgency: f32);

    /// Queue a signal for a later tick.
    fn emit_signal(&mut self, event: SignalEvent);
    /// Forward a schedule override request.
    fn override_schedule(&mut self, request: ScheduleOverride);
}

// ---------------------------------------------------------------------------
// Reusable stores
// ---------------------------------------------------------------------------

/// Small sorted map of string keys to values. Backs needs, resources and
/// reputation on hosts that have no stores of their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueBuffer {
    entries: Vec<(String, f32)>,
}

impl ValueBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<f32> {
        self.position(key).ok().map(|i| self.entries[i].1)
    }

    /// Insert or overwrite.
    pub fn set(&mut self, key: &str, value: f32) {
        match self.position(key) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (key.to_string(), value)),
        }
    }

    /// Builder form of [`ValueBuffer::set`].
    #[must_use]
    pub fn with(mut self, key: &str, value: f32) -> Self {
        self.set(key, value);
        self
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Read as a [`Slot`].
    #[must_use]
    pub fn slot(&self, key: &str) -> Slot {
        self.get(key).map_or(Slot::Vacant, Slot::Occupied)
    }

    fn position(&self, key: &str) -> Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_str().cmp(key))
    }
}

/// Affinities towards other entities, keyed by the other entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipBuffer {
    entries: Vec<(EntityId, f32)>,
}

impl RelationshipBuffer {
    /// Affinity towards `other`.
    #[must_use]
    pub fn get(&self, other: EntityId) -> Option<f32> {
        self.entries
            .binary_search_by_key(&other, |(e, _)| *e)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Insert or overwrite.
    pub fn set(&mut self, other: EntityId, affinity: f32) {
        match self.entries.binary_search_by_key(&other, |(e, _)| *e) {
            Ok(i) => self.entries[i].1 = affinity,
            Err(i) => self.entries.insert(i, (other, affinity)),
        }
    }

    /// Number of relationships.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read as a [`Slot`].
    #[must_use]
    pub fn slot(&self, other: EntityId) -> Slot {
        self.get(other).map_or(Slot::Vacant, Slot::Occupied)
    }
}

/// Key of one intent: `(intent, need, resource)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntentKey {
    /// Intent id.
    pub intent_id: String,
    /// Need the intent serves.
    pub need_id: String,
    /// Resource the intent involves.
    pub resource_id: String,
}

impl IntentKey {
    /// Key from `(parameter_id, secondary_id, tertiary_id)` of an effect.
    #[must_use]
    pub fn of(effect: &CompiledEffect) -> Self {
        Self {
            intent_id: effect.parameter_id.clone(),
            need_id: effect.secondary_id.clone(),
            resource_id: effect.tertiary_id.clone(),
        }
    }
}

/// Intent urgencies of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentBuffer {
    entries: Vec<(IntentKey, f32)>,
}

impl IntentBuffer {
    /// Urgency for `key`.
    #[must_use]
    pub fn get(&self, key: &IntentKey) -> Option<f32> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Insert or overwrite.
    pub fn set(&mut self, key: IntentKey, urgency: f32) {
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => self.entries[i].1 = urgency,
            Err(i) => self.entries.insert(i, (key, urgency)),
        }
    }

    /// Number of intents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&IntentKey, f32)> {
        self.entries.iter().map(|(k, v)| (k, *v))
    }

    /// Read as a [`Slot`].
    #[must_use]
    pub fn slot(&self, key: &IntentKey) -> Slot {
        self.get(key).map_or(Slot::Vacant, Slot::Occupied)
    }
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Apply one buffered command.
///
/// Unknown effect indices and missing target stores yield
/// [`EffectOutcome::Missed`].
pub fn apply<H: EffectHost + ?Sized>(
    library: &RuntimeLibrary,
    command: &EffectCommand,
    host: &mut H,
) -> EffectOutcome {
    let Some(effect) = library.effects.get(command.effect as usize) else {
        return EffectOutcome::Missed;
    };
    let delta = effect.magnitude * command.normalized;
    let target = command.target;

    let outcome = match effect.effect_type {
        EffectType::ModifyNeed => modify_value(host, ValueStore::Needs, effect, target, delta),
        EffectType::ModifyResource => {
            modify_value(host, ValueStore::Resources, effect, target, delta)
        }
        EffectType::ModifyReputation => {
            modify_value(host, ValueStore::Reputation, effect, target, delta)
        }
        EffectType::ModifyCohesion => match host.cohesion(target) {
            Some(before) => {
                let after = effect.clamp(before + delta);
                host.set_cohesion(target, after);
                EffectOutcome::Changed { before, after }
            }
            None => EffectOutcome::Missed,
        },
        EffectType::ModifyHealth => match host.health(target) {
            Some(health) => {
                let before = health.current;
                let after = effect.clamp(before + delta * health.max);
                host.set_health(target, after);
                EffectOutcome::Changed { before, after }
            }
            None => EffectOutcome::Missed,
        },
        EffectType::ModifyRelationship => {
            let subject = command.subject;
            if subject == target {
                EffectOutcome::Missed
            } else {
                let before = match host.relationship(subject, target) {
                    Slot::NoStore => return miss(effect, target),
                    Slot::Vacant => 0.0,
                    Slot::Occupied(v) => v,
                };
                let after = effect.clamp(before + delta);
                host.set_relationship(subject, target, after);
                EffectOutcome::Changed { before, after }
            }
        }
        EffectType::AddIntent => {
            let key = IntentKey::of(effect);
            match host.intent(target, &key) {
                Slot::NoStore => EffectOutcome::Missed,
                Slot::Vacant => {
                    let after = clamp01(delta);
                    if after <= 0.0 {
                        EffectOutcome::Missed
                    } else {
                        host.set_intent(target, key, after);
                        EffectOutcome::Changed { before: 0.0, after }
                    }
                }
                Slot::Occupied(before) => {
                    let after = clamp01(before + delta);
                    host.set_intent(target, key, after);
                    EffectOutcome::Changed { before, after }
                }
            }
        }
        EffectType::EmitSignal => match effect.signal {
            Some(signal) => {
                host.emit_signal(SignalEvent {
                    signal,
                    value: delta,
                    subject: command.subject,
                    target,
                    society_root: command.society_root,
                    context: command.context.clone(),
                    time: command.time,
                });
                EffectOutcome::Dispatched
            }
            None => EffectOutcome::Missed,
        },
        EffectType::OverrideSchedule => {
            host.override_schedule(ScheduleOverride {
                entity: target,
                activity_id: effect.parameter_id.clone(),
                duration: effect.magnitude,
                time: command.time,
            });
            EffectOutcome::Dispatched
        }
    };

    if outcome.is_applied() {
        trace!(effect = %effect.id, target = %target, ?outcome, "Effect applied");
    } else {
        return miss(effect, target);
    }
    outcome
}

fn modify_value<H: EffectHost + ?Sized>(
    host: &mut H,
    store: ValueStore,
    effect: &CompiledEffect,
    target: EntityId,
    delta: f32,
) -> EffectOutcome {
    let before = match host.value(store, target, &effect.parameter_id) {
        Slot::Occupied(v) => v,
        Slot::Vacant if store.creates_entries() => 0.0,
        Slot::Vacant | Slot::NoStore => return EffectOutcome::Missed,
    };
    let after = effect.clamp(before + delta);
    host.set_value(store, target, &effect.parameter_id, after);
    EffectOutcome::Changed { before, after }
}

fn miss(effect: &CompiledEffect, target: EntityId) -> EffectOutcome {
    trace!(effect = %effect.id, target = %target, "Effect missed");
    EffectOutcome::Missed
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::definition::{DefinitionSet, EffectDefinition, SignalDefinition};
    use crate::library::compiler::compile;

    #[derive(Default)]
    struct Host {
        values: HashMap<(EntityId, &'static str), ValueBuffer>,
        cohesion: HashMap<EntityId, f32>,
        health: HashMap<EntityId, Health>,
        relations: HashMap<EntityId, RelationshipBuffer>,
        intents: HashMap<EntityId, IntentBuffer>,
        signals: Vec<SignalEvent>,
        overrides: Vec<ScheduleOverride>,
    }

    fn store_name(store: ValueStore) -> &'static str {
        match store {
            ValueStore::Needs => "needs",
            ValueStore::Resources => "resources",
            ValueStore::Reputation => "reputation",
        }
    }

    impl EffectHost for Host {
        fn value(&self, store: ValueStore, entity: EntityId, key: &str) -> Slot {
            self.values
                .get(&(entity, store_name(store)))
                .map_or(Slot::NoStore, |b| b.slot(key))
        }
        fn set_value(&mut self, store: ValueStore, entity: EntityId, key: &str, value: f32) {
            if let Some(b) = self.values.get_mut(&(entity, store_name(store))) {
                b.set(key, value);
            }
        }
        fn cohesion(&self, entity: EntityId) -> Option<f32> {
            self.cohesion.get(&entity).copied()
        }
        fn set_cohesion(&mut self, entity: EntityId, value: f32) {
            self.cohesion.insert(entity, value);
        }
        fn health(&self, entity: EntityId) -> Option<Health> {
            self.health.get(&entity).copied()
        }
        fn set_health(&mut self, entity: EntityId, current: f32) {
            if let Some(h) = self.health.get_mut(&entity) {
                h.current = current;
            }
        }
        fn relationship(&self, subject: EntityId, other: EntityId) -> Slot {
            self.relations.get(&subject).map_or(Slot::NoStore, |b| b.slot(other))
        }
        fn set_relationship(&mut self, subject: EntityId, other: EntityId, affinity: f32) {
            if let Some(b) = self.relations.get_mut(&subject) {
                b.set(other, affinity);
            }
        }
        fn intent(&self, entity: EntityId, key: &IntentKey) -> Slot {
            self.intents.get(&entity).map_or(Slot::NoStore, |b| b.slot(key))
        }
        fn set_intent(&mut self, entity: EntityId, key: IntentKey, urgency: f32) {
            if let Some(b) = self.intents.get_mut(&entity) {
                b.set(key, urgency);
            }
        }
        fn emit_signal(&mut self, event: SignalEvent) {
            self.signals.push(event);
        }
        fn override_schedule(&mut self, request: ScheduleOverride) {
            self.overrides.push(request);
        }
    }

    const A: EntityId = EntityId(1);
    const B: EntityId = EntityId(2);

    fn lib_with(effect: EffectDefinition) -> RuntimeLibrary {
        let mut set = DefinitionSet::new();
        set.signals.push(SignalDefinition::new("gossip"));
        set.effects.push(effect);
        compile(&set)
    }

    fn command(normalized: f32, subject: EntityId, target: EntityId) -> EffectCommand {
        EffectCommand {
            effect: 0,
            rule: 0,
            weight: 1.0,
            normalized,
            subject,
            target,
            society_root: EntityId(100),
            context: Some("market".into()),
            time: 7.0,
        }
    }

    #[test]
    fn resource_clamped_at_min() {
        let lib = lib_with(
            EffectDefinition::new("tax", EffectType::ModifyResource, "gold", -3.0).clamped(0.0, 10.0),
        );
        let mut host = Host::default();
        host.values.insert((A, "resources"), ValueBuffer::new().with("gold", 2.0));
        let out = apply(&lib, &command(1.0, A, A), &mut host);
        assert_eq!(out, EffectOutcome::Changed { before: 2.0, after: 0.0 });
    }

    #[test]
    fn resource_entry_created_but_need_is_not() {
        let lib = lib_with(EffectDefinition::new("x", EffectType::ModifyResource, "wood", 2.0));
        let mut host = Host::default();
        host.values.insert((A, "resources"), ValueBuffer::new());
        assert!(apply(&lib, &command(0.5, A, A), &mut host).is_applied());
        assert_eq!(host.values[&(A, "resources")].get("wood"), Some(1.0));

        let lib = lib_with(EffectDefinition::new("x", EffectType::ModifyNeed, "hunger", 2.0));
        host.values.insert((A, "needs"), ValueBuffer::new());
        assert_eq!(apply(&lib, &command(0.5, A, A), &mut host), EffectOutcome::Missed);
    }

    #[test]
    fn missing_store_is_miss() {
        let lib = lib_with(EffectDefinition::new("x", EffectType::ModifyReputation, "guild", 1.0));
        let mut host = Host::default();
        assert_eq!(apply(&lib, &command(1.0, A, B), &mut host), EffectOutcome::Missed);
        let lib = lib_with(EffectDefinition::new("x", EffectType::ModifyCohesion, "", 1.0));
        assert_eq!(apply(&lib, &command(1.0, A, B), &mut host), EffectOutcome::Missed);
    }

    #[test]
    fn health_scales_by_max() {
        let lib = lib_with(EffectDefinition::new("hurt", EffectType::ModifyHealth, "", -0.1));
        let mut host = Host::default();
        host.health.insert(A, Health { current: 50.0, max: 100.0 });
        let out = apply(&lib, &command(1.0, A, A), &mut host);
        assert_eq!(out, EffectOutcome::Changed { before: 50.0, after: 40.0 });
    }

    #[test]
    fn relationship_never_for_self() {
        let lib = lib_with(EffectDefinition::new("like", EffectType::ModifyRelationship, "", 0.5));
        let mut host = Host::default();
        host.relations.insert(A, RelationshipBuffer::default());
        assert_eq!(apply(&lib, &command(1.0, A, A), &mut host), EffectOutcome::Missed);
        assert!(host.relations[&A].is_empty());
        assert!(apply(&lib, &command(1.0, A, B), &mut host).is_applied());
        assert_eq!(host.relations[&A].get(B), Some(0.5));
    }

    #[test]
    fn zero_urgency_intent_not_added() {
        let lib = lib_with(
            EffectDefinition::new("want", EffectType::AddIntent, "buy", 0.6)
                .with_secondary("hunger")
                .with_tertiary("bread"),
        );
        let mut host = Host::default();
        host.intents.insert(A, IntentBuffer::default());
        assert_eq!(apply(&lib, &command(0.0, A, A), &mut host), EffectOutcome::Missed);
        assert!(host.intents[&A].is_empty());
        assert!(apply(&lib, &command(1.0, A, A), &mut host).is_applied());
        assert!(apply(&lib, &command(1.0, A, A), &mut host).is_applied());
        let (key, urgency) = host.intents[&A].iter().next().expect("intent");
        assert_eq!(key.resource_id, "bread");
        assert!((urgency - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn emit_signal_queues_event() {
        let lib = lib_with(EffectDefinition::new("rumor", EffectType::EmitSignal, "gossip", 2.0));
        let mut host = Host::default();
        assert_eq!(apply(&lib, &command(0.5, A, B), &mut host), EffectOutcome::Dispatched);
        let ev = &host.signals[0];
        assert_eq!(ev.signal, 0);
        assert!((ev.value - 1.0).abs() < f32::EPSILON);
        assert_eq!(ev.target, B);
        assert_eq!(ev.context.as_deref(), Some("market"));
    }

    #[test]
    fn schedule_override_is_a_message() {
        let lib = lib_with(EffectDefinition::new("hide", EffectType::OverrideSchedule, "shelter", 30.0));
        let mut host = Host::default();
        assert_eq!(apply(&lib, &command(0.2, A, B), &mut host), EffectOutcome::Dispatched);
        assert_eq!(host.overrides[0].activity_id, "shelter");
        assert!((host.overrides[0].duration - 30.0).abs() < f32::EPSILON);
        assert_eq!(host.overrides[0].entity, B);
    }
}
