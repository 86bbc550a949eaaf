//! Per-entity runtime state.
//!
//! Sized once at spawn from the metrics the entity tracks: enabled under its
//! society's mask and matching its scope (members track member metrics, the
//! society root tracks society metrics). Owned exclusively by the entity, so
//! entities can be ticked in parallel.

use serde::{Deserialize, Serialize};

use crate::config::SamplerConfig;
use crate::context::SimulationContext;
use crate::definition::{MetricScope, SamplingMode};
use crate::effects::EffectCommand;
use crate::evaluator::{EvaluationReport, EvaluationRequest, RandomSeed, RuleCooldowns, RuleEvaluator};
use crate::sampler::{MetricAccumulator, MetricSampler, MetricSample, MetricTimer, PendingEvent};
use crate::types::{EntityId, LibIndex, LodTier, SimTime};

/// Everything the engine keeps for one simulated entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRuntime {
    entity: EntityId,
    society_root: EntityId,
    scope: MetricScope,
    lod: LodTier,
    /// Aggregate-mode accumulators, sorted by metric; parallel to `timers`.
    accumulators: Vec<MetricAccumulator>,
    timers: Vec<MetricTimer>,
    /// Event-mode metrics tracked, sorted.
    event_metrics: Vec<LibIndex>,
    pending: Vec<PendingEvent>,
    cooldowns: RuleCooldowns,
    seed: RandomSeed,
}

impl EntityRuntime {
    /// Build state for `entity`.
    ///
    /// `ctx.now` is the spawn time. With `stagger_first_sample`, each timer's
    /// first flush lands somewhere within its first interval, derived from the
    /// entity id so that large populations do not flush in lockstep.
    #[must_use]
    pub fn new(
        ctx: &SimulationContext<'_>,
        entity: EntityId,
        society_root: EntityId,
        scope: MetricScope,
        seed: u32,
        config: &SamplerConfig,
    ) -> Self {
        let scale = ctx.sample_interval_scale();
        let min_interval = config.min_sample_interval.max(f32::EPSILON);
        let phase = if config.stagger_first_sample {
            stagger_phase(entity)
        } else {
            1.0
        };

        let mut accumulators = Vec::new();
        let mut timers = Vec::new();
        let mut event_metrics = Vec::new();
        for (i, metric) in ctx.library.metrics.iter().enumerate() {
            let idx = i as LibIndex;
            if metric.scope != scope || !ctx.metric_enabled(idx) {
                continue;
            }
            match metric.sampling_mode {
                SamplingMode::Aggregate => {
                    let interval = (metric.sample_interval * scale).max(min_interval);
                    accumulators.push(MetricAccumulator::new(idx));
                    timers.push(MetricTimer {
                        metric: idx,
                        interval,
                        next_sample_time: ctx.now + f64::from(interval) * phase,
                    });
                }
                SamplingMode::Event => event_metrics.push(idx),
            }
        }

        Self {
            entity,
            society_root,
            scope,
            lod: ctx.lod(),
            accumulators,
            timers,
            event_metrics,
            pending: Vec::new(),
            cooldowns: RuleCooldowns::default(),
            seed: RandomSeed::new(seed),
        }
    }

    /// Entity id.
    #[must_use]
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Society root id. Equal to `entity()` for roots.
    #[must_use]
    pub fn society_root(&self) -> EntityId {
        self.society_root
    }

    /// Which metrics this entity tracks.
    #[must_use]
    pub fn scope(&self) -> MetricScope {
        self.scope
    }

    /// Detail tier inherited from the society's mask.
    #[must_use]
    pub fn lod(&self) -> LodTier {
        self.lod
    }

    /// Current random state.
    #[must_use]
    pub fn seed(&self) -> RandomSeed {
        self.seed
    }

    /// Cooldown table.
    #[must_use]
    pub fn cooldowns(&self) -> &RuleCooldowns {
        &self.cooldowns
    }

    /// Aggregate-mode accumulators.
    #[must_use]
    pub fn accumulators(&self) -> &[MetricAccumulator] {
        &self.accumulators
    }

    /// Aggregate-mode timers.
    #[must_use]
    pub fn timers(&self) -> &[MetricTimer] {
        &self.timers
    }

    /// Event samples waiting for the next flush.
    #[must_use]
    pub fn pending_events(&self) -> &[PendingEvent] {
        &self.pending
    }

    /// Whether `metric` is tracked in either mode.
    #[must_use]
    pub fn tracks(&self, metric: LibIndex) -> bool {
        self.accumulator_position(metric).is_some() || self.tracks_event_metric(metric)
    }

    /// Whether `metric` is tracked in event mode.
    #[must_use]
    pub fn tracks_event_metric(&self, metric: LibIndex) -> bool {
        self.event_metrics.binary_search(&metric).is_ok()
    }

    /// Earliest pending timer, if any. Hosts can use it to skip idle entities.
    #[must_use]
    pub fn next_due(&self) -> Option<SimTime> {
        self.timers
            .iter()
            .map(|t| t.next_sample_time)
            .min_by(f64::total_cmp)
    }

    /// Accumulator for `metric`.
    pub fn accumulator_mut(&mut self, metric: LibIndex) -> Option<&mut MetricAccumulator> {
        self.accumulator_position(metric)
            .map(|i| &mut self.accumulators[i])
    }

    pub(crate) fn push_pending(&mut self, event: PendingEvent) {
        self.pending.push(event);
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn timers_and_accumulators_mut(
        &mut self,
    ) -> (&mut [MetricTimer], &mut [MetricAccumulator]) {
        (&mut self.timers, &mut self.accumulators)
    }

    fn accumulator_position(&self, metric: LibIndex) -> Option<usize> {
        self.accumulators
            .binary_search_by_key(&metric, |a| a.metric)
            .ok()
    }

    /// Evaluate one sample against this entity's cooldowns and seed.
    pub fn evaluate(
        &mut self,
        ctx: &SimulationContext<'_>,
        evaluator: &RuleEvaluator,
        request: &EvaluationRequest<'_>,
        out: &mut Vec<EffectCommand>,
    ) -> EvaluationReport {
        evaluator.evaluate(ctx, request, &mut self.cooldowns, &mut self.seed, out)
    }

    /// One tick of this entity: flush due samples into `samples`, then
    /// evaluate every observed sample into `commands`.
    pub fn tick(
        &mut self,
        ctx: &SimulationContext<'_>,
        sampler: &MetricSampler,
        evaluator: &RuleEvaluator,
        samples: &mut Vec<MetricSample>,
        commands: &mut Vec<EffectCommand>,
    ) -> EvaluationReport {
        let start = samples.len();
        sampler.flush(ctx, self, samples);

        let mut report = EvaluationReport::default();
        for sample in &samples[start..] {
            if sample.observed {
                report += self.evaluate(ctx, evaluator, &EvaluationRequest::from_sample(sample), commands);
            }
        }
        report
    }
}

/// Fraction in `(0, 1]` of the first interval, derived from the entity id.
fn stagger_phase(entity: EntityId) -> f64 {
    // splitmix64 finalizer
    let mut z = entity.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    ((z >> 11) as f64 + 1.0) / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        Aggregation, DefinitionSet, EffectDefinition, EffectType, MetricDefinition,
        RuleDefinition, RuleSetDefinition, SignalDefinition, SocietyProfileDefinition,
    };
    use crate::library::compiler::compile;
    use crate::library::RuntimeLibrary;
    use crate::profile::ProfileMask;
    use crate::sampler::Observation;

    fn library() -> RuntimeLibrary {
        let mut set = DefinitionSet::new();
        set.signals.push(SignalDefinition::new("noise"));
        set.metrics.push(MetricDefinition::new("loudness", "noise").every(2.0).aggregated(Aggregation::Average));
        set.metrics.push(
            MetricDefinition::new("din", "noise").scoped(MetricScope::Society),
        );
        set.metrics.push(MetricDefinition::new("shout", "noise").sampled(SamplingMode::Event));
        set.effects.push(EffectDefinition::new("annoy", EffectType::ModifyNeed, "calm", -0.1));
        set.rule_sets.push(
            RuleSetDefinition::new("rs")
                .with_rule(RuleDefinition::new("loudness").with_effect("annoy"))
                .with_rule(RuleDefinition::new("shout").with_effect("annoy")),
        );
        compile(&set)
    }

    fn unstaggered() -> SamplerConfig {
        SamplerConfig {
            stagger_first_sample: false,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn sized_by_scope() {
        let lib = library();
        let ctx = SimulationContext::new(&lib, 0.0);
        let member = EntityRuntime::new(&ctx, EntityId(1), EntityId(0), MetricScope::Member, 1, &unstaggered());
        let root = EntityRuntime::new(&ctx, EntityId(0), EntityId(0), MetricScope::Society, 1, &unstaggered());
        assert_eq!(member.accumulators().len(), 1);
        assert!(member.tracks(lib.metric_index("shout").expect("metric")));
        assert_eq!(root.accumulators().len(), 1);
        assert!(root.tracks(lib.metric_index("din").expect("metric")));
        assert!(!root.tracks(lib.metric_index("loudness").expect("metric")));
    }

    #[test]
    fn sized_by_mask() {
        let lib = library();
        let mask = ProfileMask::compile(&SocietyProfileDefinition::new("quiet"), &lib);
        let ctx = SimulationContext::new(&lib, 0.0).with_mask(Some(&mask));
        let member = EntityRuntime::new(&ctx, EntityId(1), EntityId(0), MetricScope::Member, 1, &unstaggered());
        assert!(member.accumulators().is_empty());
        assert!(member.next_due().is_none());
    }

    #[test]
    fn profile_scale_stretches_intervals() {
        let lib = library();
        let loudness = lib.metric_index("loudness").expect("metric");
        let slow = ProfileMask::compile(
            &SocietyProfileDefinition::new("sleepy")
                .at_lod(LodTier::Aggregated)
                .with_interval_scale(3.0)
                .with_rule_set("rs"),
            &lib,
        );
        let ctx = SimulationContext::new(&lib, 0.0).with_mask(Some(&slow));
        let rt = EntityRuntime::new(&ctx, EntityId(1), EntityId(0), MetricScope::Member, 1, &unstaggered());
        let timer = rt.timers().iter().find(|t| t.metric == loudness).expect("timer");
        assert!((timer.interval - 6.0).abs() < f32::EPSILON);
        assert!((timer.next_sample_time - 6.0).abs() < 1e-9);
        assert_eq!(rt.lod(), LodTier::Aggregated);

        // The minimum interval floors a tiny scale.
        let fast = ProfileMask::compile(
            &SocietyProfileDefinition::new("hasty")
                .with_interval_scale(0.001)
                .with_rule_set("rs"),
            &lib,
        );
        let config = SamplerConfig {
            min_sample_interval: 0.5,
            ..unstaggered()
        };
        let ctx = SimulationContext::new(&lib, 0.0).with_mask(Some(&fast));
        let rt = EntityRuntime::new(&ctx, EntityId(1), EntityId(0), MetricScope::Member, 1, &config);
        assert!((rt.timers()[0].interval - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn stagger_within_first_interval() {
        let lib = library();
        let ctx = SimulationContext::new(&lib, 10.0);
        for id in 0..50 {
            let rt = EntityRuntime::new(&ctx, EntityId(id), EntityId(0), MetricScope::Member, 1, &SamplerConfig::default());
            let due = rt.next_due().expect("timer");
            assert!(due > 10.0 && due <= 12.0, "due = {due}");
        }
    }

    #[test]
    fn tick_flushes_and_evaluates() {
        let lib = library();
        let sampler = MetricSampler::new(unstaggered());
        let evaluator = RuleEvaluator::default();
        let ctx = SimulationContext::new(&lib, 0.0);
        let mut rt = EntityRuntime::new(&ctx, EntityId(1), EntityId(0), MetricScope::Member, 5, sampler.config());

        let noise = lib.signal_index("noise").expect("signal");
        assert_eq!(sampler.observe(&ctx, &mut rt, &Observation::new(noise, 0.8, 0.5)), 2);
        assert_eq!(rt.pending_events().len(), 1);

        let mut samples = Vec::new();
        let mut commands = Vec::new();
        // At t=1 only the event sample is due.
        let report = rt.tick(&ctx.at(1.0), &sampler, &evaluator, &mut samples, &mut commands);
        assert_eq!(samples.len(), 1);
        assert_eq!(report.samples, 1);
        assert!(rt.pending_events().is_empty());

        // At t=2 the loudness timer flushes.
        let report = rt.tick(&ctx.at(2.0), &sampler, &evaluator, &mut samples, &mut commands);
        assert_eq!(samples.len(), 2);
        assert!((samples[1].value - 0.8).abs() < f32::EPSILON);
        assert_eq!(report.samples, 1);
        assert!((rt.timers()[0].next_sample_time - 4.0).abs() < 1e-9);

        // Empty period: sample recorded, no evaluation.
        let report = rt.tick(&ctx.at(4.0), &sampler, &evaluator, &mut samples, &mut commands);
        assert_eq!(samples.len(), 3);
        assert!(!samples[2].observed);
        assert_eq!(report.samples, 0);
    }
}
