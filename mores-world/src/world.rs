//! The in-memory world: societies, entities and the stores effects touch.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use mores_core::definition::MetricScope;
use mores_core::effects::{
    EffectHost, Health, IntentBuffer, IntentKey, RelationshipBuffer, ScheduleOverride,
    SignalEvent, Slot, ValueBuffer, ValueStore,
};
use mores_core::error::Result;
use mores_core::metrics::{EngineCounters, TickBudgetMonitor};
use mores_core::sampler::SampleSink;
use mores_core::{
    DefinitionSet, EntityId, EntityRuntime, LibIndex, LibraryCompiler, MetricSample,
    MetricSampler, MoresConfig, MoresError, Observation, ProfileMask, ProfileMasks,
    RuleEvaluator, RuntimeLibrary, SimTime, SimulationContext,
};

use crate::clock::SocietyClock;
use crate::components::{EntityRecord, EntityStores, SocietyRecord};
use crate::events::{QueuedSignal, SignalQueue};
use crate::systems::{self, TickReport};

/// Reference host owning every society, entity and store.
///
/// Entities live in a `BTreeMap`, so iteration (and therefore the order
/// effects are applied in) follows entity id.
pub struct SocietyWorld {
    pub(crate) library: Arc<RuntimeLibrary>,
    pub(crate) masks: ProfileMasks,
    pub(crate) config: MoresConfig,
    pub(crate) sampler: MetricSampler,
    pub(crate) evaluator: RuleEvaluator,
    pub(crate) societies: BTreeMap<EntityId, SocietyRecord>,
    pub(crate) entities: BTreeMap<EntityId, EntityRecord>,
    pub(crate) signals: SignalQueue,
    pub(crate) samples: Vec<MetricSample>,
    pub(crate) sink: Option<Box<dyn SampleSink + Send>>,
    pub(crate) schedule: Vec<ScheduleOverride>,
    pub(crate) emitted: Vec<SignalEvent>,
    pub(crate) counters: EngineCounters,
    pub(crate) monitor: TickBudgetMonitor,
    pub(crate) time: SimTime,
    next_id: u64,
}

/// Mask of `society`, or `None` (everything enabled) when it has no
/// profile or its profile never compiled.
pub(crate) fn society_mask<'a>(
    masks: &'a ProfileMasks,
    society: Option<&SocietyRecord>,
) -> Option<&'a ProfileMask> {
    society
        .and_then(|s| s.profile.as_deref())
        .and_then(|p| masks.get(p))
}

impl SocietyWorld {
    /// World over an already compiled library.
    #[must_use]
    pub fn new(library: Arc<RuntimeLibrary>, masks: ProfileMasks, config: MoresConfig) -> Self {
        Self {
            sampler: MetricSampler::new(config.sampler.clone()),
            evaluator: RuleEvaluator::new(config.evaluator.clone()),
            monitor: TickBudgetMonitor::new(config.telemetry.tick_budget_ms),
            counters: EngineCounters::new(),
            library,
            masks,
            config,
            societies: BTreeMap::new(),
            entities: BTreeMap::new(),
            signals: SignalQueue::default(),
            samples: Vec::new(),
            sink: None,
            schedule: Vec::new(),
            emitted: Vec::new(),
            time: 0.0,
            next_id: 1,
        }
    }

    /// Compile `definitions` (library and profile masks) and wrap them.
    #[must_use]
    pub fn from_definitions(definitions: &DefinitionSet, config: MoresConfig) -> Self {
        let library = LibraryCompiler::new(config.compiler.clone()).compile(definitions);
        let masks = ProfileMasks::compile_all(&definitions.profiles, &library);
        info!(
            profiles = masks.len(),
            rules = library.rules.len(),
            "World library ready"
        );
        Self::new(Arc::new(library), masks, config)
    }

    /// Send every flushed sample to `sink`, in entity order, as ticks apply.
    #[must_use]
    pub fn with_sink(mut self, sink: impl SampleSink + Send + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Replace the sample sink, returning the old one.
    pub fn set_sink(
        &mut self,
        sink: Option<Box<dyn SampleSink + Send>>,
    ) -> Option<Box<dyn SampleSink + Send>> {
        std::mem::replace(&mut self.sink, sink)
    }

    // -----------------------------------------------------------------------
    // Spawning
    // -----------------------------------------------------------------------

    /// Create a society root. A seed of 0 uses the configured default.
    pub fn spawn_society(&mut self, profile_id: Option<&str>, seed: u32) -> EntityId {
        if let Some(id) = profile_id {
            if self.masks.get(id).is_none() {
                warn!(profile = id, "Unknown society profile, enabling the full library");
            }
        }
        let root = self.allocate_id();
        let seed = self.resolve_seed(seed);
        let society = SocietyRecord::new(root, profile_id.map(str::to_string), self.time);
        let runtime = {
            let ctx = SimulationContext::new(&self.library, society.now)
                .with_mask(society_mask(&self.masks, Some(&society)));
            EntityRuntime::new(&ctx, root, root, MetricScope::Society, seed, self.sampler.config())
        };
        debug!(society = %root, profile = ?profile_id, "Society spawned");
        self.entities.insert(root, EntityRecord::new(runtime));
        self.societies.insert(root, society);
        root
    }

    /// Add a member to the society rooted at `society`.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` if `society` is not a society root.
    pub fn spawn_member(&mut self, society: EntityId, seed: u32) -> Result<EntityId> {
        if !self.societies.contains_key(&society) {
            return Err(MoresError::UnknownEntity(society));
        }
        let id = self.allocate_id();
        let seed = self.resolve_seed(seed);
        let record = self.societies.get(&society);
        let now = record.map_or(self.time, |s| s.now);
        let runtime = {
            let ctx = SimulationContext::new(&self.library, now)
                .with_mask(society_mask(&self.masks, record));
            EntityRuntime::new(&ctx, id, society, MetricScope::Member, seed, self.sampler.config())
        };
        self.entities.insert(id, EntityRecord::new(runtime));
        if let Some(s) = self.societies.get_mut(&society) {
            s.members.push(id);
        }
        Ok(id)
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    fn resolve_seed(&self, seed: u32) -> u32 {
        if seed == 0 {
            self.config.evaluator.default_seed
        } else {
            seed
        }
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    /// Stores of `entity`.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for ids the world never spawned.
    pub fn stores_mut(&mut self, entity: EntityId) -> Result<&mut EntityStores> {
        self.entities
            .get_mut(&entity)
            .map(|r| &mut r.stores)
            .ok_or(MoresError::UnknownEntity(entity))
    }

    /// Give `entity` a needs store.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn set_needs(&mut self, entity: EntityId, needs: ValueBuffer) -> Result<()> {
        self.stores_mut(entity)?.needs = Some(needs);
        Ok(())
    }

    /// Give `entity` a resources store.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn set_resources(&mut self, entity: EntityId, resources: ValueBuffer) -> Result<()> {
        self.stores_mut(entity)?.resources = Some(resources);
        Ok(())
    }

    /// Give `entity` a reputation store.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn set_reputation(&mut self, entity: EntityId, reputation: ValueBuffer) -> Result<()> {
        self.stores_mut(entity)?.reputation = Some(reputation);
        Ok(())
    }

    /// Set the cohesion scalar.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn set_cohesion(&mut self, entity: EntityId, cohesion: f32) -> Result<()> {
        self.stores_mut(entity)?.cohesion = Some(cohesion);
        Ok(())
    }

    /// Set health.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn set_health(&mut self, entity: EntityId, current: f32, max: f32) -> Result<()> {
        self.stores_mut(entity)?.health = Some(Health { current, max });
        Ok(())
    }

    /// Give `entity` an empty relationship store.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn enable_relationships(&mut self, entity: EntityId) -> Result<()> {
        self.stores_mut(entity)?
            .relationships
            .get_or_insert_with(RelationshipBuffer::default);
        Ok(())
    }

    /// Give `entity` an empty intent store.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn enable_intents(&mut self, entity: EntityId) -> Result<()> {
        self.stores_mut(entity)?
            .intents
            .get_or_insert_with(IntentBuffer::default);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Index of the signal named `id`.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownSignal` if the library has no such signal.
    pub fn signal(&self, id: &str) -> Result<LibIndex> {
        self.library
            .signal_index(id)
            .ok_or_else(|| MoresError::UnknownSignal(id.to_string()))
    }

    /// Feed an observation straight into `subject`'s metrics, and into its
    /// society root's society-scope metrics. Returns how many metrics took it.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` or `MoresError::UnknownSignal`.
    pub fn observe(&mut self, subject: EntityId, observation: &Observation) -> Result<usize> {
        let root = self
            .entities
            .get(&subject)
            .map(|r| r.runtime.society_root())
            .ok_or(MoresError::UnknownEntity(subject))?;
        if observation.signal as usize >= self.library.signals.len() {
            return Err(MoresError::UnknownSignal(observation.signal.to_string()));
        }

        let ctx = SimulationContext::new(&self.library, observation.time)
            .with_mask(society_mask(&self.masks, self.societies.get(&root)));
        let mut taken = 0;
        if let Some(record) = self.entities.get_mut(&subject) {
            taken += self.sampler.observe(&ctx, &mut record.runtime, observation);
        }
        if root != subject {
            if let Some(record) = self.entities.get_mut(&root) {
                taken += self.sampler.observe(&ctx, &mut record.runtime, observation);
            }
        }

        let counter = if taken > 0 {
            &self.counters.observations
        } else {
            &self.counters.observations_ignored
        };
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(taken)
    }

    /// Observe the signal named `signal_id` at the subject's society time.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` or `MoresError::UnknownSignal`.
    pub fn observe_signal(&mut self, subject: EntityId, signal_id: &str, value: f32) -> Result<usize> {
        let signal = self.signal(signal_id)?;
        let time = self.society_time(subject)?;
        self.observe(subject, &Observation::new(signal, value, time))
    }

    /// Queue a signal for delivery on the next tick.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` or `MoresError::UnknownSignal`.
    pub fn emit(&mut self, signal: QueuedSignal) -> Result<()> {
        if !self.entities.contains_key(&signal.subject) {
            return Err(MoresError::UnknownEntity(signal.subject));
        }
        if signal.signal as usize >= self.library.signals.len() {
            return Err(MoresError::UnknownSignal(signal.signal.to_string()));
        }
        self.signals.push(signal);
        Ok(())
    }

    /// Queue the signal named `signal_id` at its authored default weight.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` or `MoresError::UnknownSignal`.
    pub fn raise(&mut self, subject: EntityId, signal_id: &str) -> Result<()> {
        let signal = self.signal(signal_id)?;
        let value = self.library.signals[signal as usize].default_weight;
        self.emit(QueuedSignal::new(signal, subject, value))
    }

    /// Current time of the society `entity` belongs to.
    ///
    /// # Errors
    /// Returns `MoresError::UnknownEntity` for unknown ids.
    pub fn society_time(&self, entity: EntityId) -> Result<SimTime> {
        let record = self
            .entities
            .get(&entity)
            .ok_or(MoresError::UnknownEntity(entity))?;
        Ok(self
            .societies
            .get(&record.runtime.society_root())
            .map_or(self.time, |s| s.now))
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick. See [`crate::systems`].
    pub fn tick(&mut self, clock: &dyn SocietyClock) -> TickReport {
        systems::run_tick(self, clock)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Compiled library.
    #[must_use]
    pub fn library(&self) -> &Arc<RuntimeLibrary> {
        &self.library
    }

    /// Compiled profile masks.
    #[must_use]
    pub fn masks(&self) -> &ProfileMasks {
        &self.masks
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &MoresConfig {
        &self.config
    }

    /// One entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    /// Every entity in id order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    /// Number of entities, roots included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// One society.
    #[must_use]
    pub fn society(&self, root: EntityId) -> Option<&SocietyRecord> {
        self.societies.get(&root)
    }

    /// Every society in root order.
    pub fn societies(&self) -> impl Iterator<Item = &SocietyRecord> {
        self.societies.values()
    }

    /// Latest time any society clock reported.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Retained samples (only with `world.retain_samples`).
    #[must_use]
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Take the retained samples.
    pub fn take_samples(&mut self) -> Vec<MetricSample> {
        std::mem::take(&mut self.samples)
    }

    /// Schedule overrides not yet collected.
    #[must_use]
    pub fn schedule_overrides(&self) -> &[ScheduleOverride] {
        &self.schedule
    }

    /// Hand the schedule overrides to the schedule system.
    pub fn take_schedule_overrides(&mut self) -> Vec<ScheduleOverride> {
        std::mem::take(&mut self.schedule)
    }

    /// Signals raised by `EmitSignal` effects and not yet collected.
    #[must_use]
    pub fn signal_events(&self) -> &[SignalEvent] {
        &self.emitted
    }

    /// Hand the emitted signals to a log or narrative system.
    pub fn take_signal_events(&mut self) -> Vec<SignalEvent> {
        std::mem::take(&mut self.emitted)
    }

    /// Signals waiting for the next tick.
    #[must_use]
    pub fn pending_signals(&self) -> usize {
        self.signals.len()
    }

    /// Engine counters.
    #[must_use]
    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    /// Tick timing monitor.
    #[must_use]
    pub fn monitor(&self) -> &TickBudgetMonitor {
        &self.monitor
    }
}

// ---------------------------------------------------------------------------
// Effect host
// ---------------------------------------------------------------------------

impl EffectHost for SocietyWorld {
    fn value(&self, store: ValueStore, entity: EntityId, key: &str) -> Slot {
        self.entities
            .get(&entity)
            .and_then(|r| r.stores.values(store))
            .map_or(Slot::NoStore, |b| b.slot(key))
    }

    fn set_value(&mut self, store: ValueStore, entity: EntityId, key: &str, value: f32) {
        if let Some(buffer) = self
            .entities
            .get_mut(&entity)
            .and_then(|r| r.stores.values_mut(store))
        {
            buffer.set(key, value);
        }
    }

    fn cohesion(&self, entity: EntityId) -> Option<f32> {
        self.entities.get(&entity).and_then(|r| r.stores.cohesion)
    }

    fn set_cohesion(&mut self, entity: EntityId, value: f32) {
        if let Some(c) = self
            .entities
            .get_mut(&entity)
            .and_then(|r| r.stores.cohesion.as_mut())
        {
            *c = value;
        }
    }

    fn health(&self, entity: EntityId) -> Option<Health> {
        self.entities.get(&entity).and_then(|r| r.stores.health)
    }

    fn set_health(&mut self, entity: EntityId, current: f32) {
        if let Some(h) = self
            .entities
            .get_mut(&entity)
            .and_then(|r| r.stores.health.as_mut())
        {
            h.current = current;
        }
    }

    fn relationship(&self, subject: EntityId, other: EntityId) -> Slot {
        self.entities
            .get(&subject)
            .and_then(|r| r.stores.relationships.as_ref())
            .map_or(Slot::NoStore, |b| b.slot(other))
    }

    fn set_relationship(&mut self, subject: EntityId, other: EntityId, affinity: f32) {
        if let Some(b) = self
            .entities
            .get_mut(&subject)
            .and_then(|r| r.stores.relationships.as_mut())
        {
            b.set(other, affinity);
        }
    }

    fn intent(&self, entity: EntityId, key: &IntentKey) -> Slot {
        self.entities
            .get(&entity)
            .and_then(|r| r.stores.intents.as_ref())
            .map_or(Slot::NoStore, |b| b.slot(key))
    }

    fn set_intent(&mut self, entity: EntityId, key: IntentKey, urgency: f32) {
        if let Some(b) = self
            .entities
            .get_mut(&entity)
            .and_then(|r| r.stores.intents.as_mut())
        {
            b.set(key, urgency);
        }
    }

    fn emit_signal(&mut self, event: SignalEvent) {
        self.signals.push(event.clone().into());
        self.emitted.push(event);
    }

    fn override_schedule(&mut self, request: ScheduleOverride) {
        debug!(entity = %request.entity, activity = %request.activity_id, "Schedule override queued");
        self.schedule.push(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mores_core::definition::{
        EffectDefinition, EffectType, MetricDefinition, RuleDefinition, RuleSetDefinition,
        SignalDefinition, SocietyProfileDefinition,
    };

    fn definitions() -> DefinitionSet {
        let mut set = DefinitionSet::new();
        set.signals.push(SignalDefinition::new("theft"));
        set.metrics.push(MetricDefinition::new("thefts", "theft"));
        set.metrics.push(MetricDefinition::new("crime", "theft").scoped(MetricScope::Society));
        set.effects.push(EffectDefinition::new("fear", EffectType::ModifyNeed, "safety", -0.1));
        set.rule_sets.push(
            RuleSetDefinition::new("order").with_rule(RuleDefinition::new("thefts").with_effect("fear")),
        );
        set.profiles.push(SocietyProfileDefinition::new("hermits"));
        set
    }

    #[test]
    fn members_and_roots_track_their_scope() {
        let mut world = SocietyWorld::from_definitions(&definitions(), MoresConfig::default());
        let root = world.spawn_society(None, 1);
        let member = world.spawn_member(root, 2).expect("member");
        let crime = world.library().metric_index("crime").expect("metric");
        let thefts = world.library().metric_index("thefts").expect("metric");

        assert!(world.entity(root).expect("root").runtime.tracks(crime));
        assert!(!world.entity(member).expect("member").runtime.tracks(crime));
        assert!(world.entity(member).expect("member").runtime.tracks(thefts));
        assert_eq!(world.society(root).expect("society").members, vec![member]);
        assert!(world.entity(root).expect("root").is_root());
    }

    #[test]
    fn member_observation_reaches_root() {
        let mut world = SocietyWorld::from_definitions(&definitions(), MoresConfig::default());
        let root = world.spawn_society(None, 1);
        let member = world.spawn_member(root, 2).expect("member");
        assert_eq!(world.observe_signal(member, "theft", 1.0).expect("observe"), 2);
        assert_eq!(world.observe_signal(root, "theft", 1.0).expect("observe"), 1);
    }

    #[test]
    fn empty_profile_tracks_nothing() {
        let mut world = SocietyWorld::from_definitions(&definitions(), MoresConfig::default());
        let root = world.spawn_society(Some("hermits"), 1);
        let member = world.spawn_member(root, 2).expect("member");
        assert_eq!(world.observe_signal(member, "theft", 1.0).expect("observe"), 0);
        let snap = world.counters().snapshot();
        assert_eq!(snap.observations_ignored, 1);
    }

    #[test]
    fn unknown_ids_are_errors() {
        let mut world = SocietyWorld::from_definitions(&definitions(), MoresConfig::default());
        let root = world.spawn_society(None, 1);
        assert!(matches!(
            world.spawn_member(EntityId(99), 1),
            Err(MoresError::UnknownEntity(EntityId(99)))
        ));
        assert!(matches!(
            world.observe_signal(root, "riot", 1.0),
            Err(MoresError::UnknownSignal(_))
        ));
        assert!(matches!(
            world.emit(QueuedSignal::new(0, EntityId(42), 1.0)),
            Err(MoresError::UnknownEntity(_))
        ));
        assert!(matches!(
            world.emit(QueuedSignal::new(7, root, 1.0)),
            Err(MoresError::UnknownSignal(_))
        ));
        assert!(world.set_cohesion(EntityId(42), 0.5).is_err());
    }

    #[test]
    fn raise_uses_default_weight() {
        let mut set = definitions();
        set.signals[0].default_weight = 0.25;
        let mut world = SocietyWorld::from_definitions(&set, MoresConfig::default());
        let root = world.spawn_society(None, 1);
        world.raise(root, "theft").expect("raise");
        assert_eq!(world.pending_signals(), 1);
        let queued = world.signals.drain_up_to(1);
        assert!((queued[0].value - 0.25).abs() < f32::EPSILON);
        assert_eq!(queued[0].subject, root);
        assert!(matches!(world.raise(root, "riot"), Err(MoresError::UnknownSignal(_))));
    }

    #[test]
    fn host_reports_missing_stores() {
        let mut world = SocietyWorld::from_definitions(&definitions(), MoresConfig::default());
        let root = world.spawn_society(None, 1);
        assert_eq!(world.value(ValueStore::Needs, root, "safety"), Slot::NoStore);
        world.set_needs(root, ValueBuffer::new().with("safety", 0.5)).expect("needs");
        assert_eq!(world.value(ValueStore::Needs, root, "safety"), Slot::Occupied(0.5));
        assert_eq!(world.value(ValueStore::Needs, root, "hunger"), Slot::Vacant);
        world.enable_relationships(root).expect("relationships");
        assert_eq!(world.relationship(root, EntityId(5)), Slot::Vacant);
    }
}
