//! Metric sampler: raw observations in, normalized samples out.
//!
//! Per (entity, metric) there is one run state, accumulating. A flush is an
//! edge triggered by the metric's timer:
//!
//! ```text
//!   observe(v)  ->  sum += v, count += 1, min/max/last updated
//!   now >= next ->  aggregate -> normalize -> MetricSample
//!                   reset accumulator, next = now + interval
//! ```
//!
//! Event-mode metrics bypass aggregation: every observation queues a sample
//! that is emitted on the entity's next flush.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::SamplerConfig;
use crate::context::SimulationContext;
use crate::definition::{Aggregation, Normalization, SamplingMode};
use crate::state::EntityRuntime;
use crate::types::{clamp01, EntityId, LibIndex, SimTime};

// ---------------------------------------------------------------------------
// Per-entity records
// ---------------------------------------------------------------------------

/// Running aggregate of one metric's observations since the last flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAccumulator {
    /// Metric index.
    pub metric: LibIndex,
    /// Sum of observed values.
    pub sum: f32,
    /// Smallest observed value; `+inf` when empty.
    pub min: f32,
    /// Largest observed value; `-inf` when empty.
    pub max: f32,
    /// Most recent observed value.
    pub last: f32,
    /// Number of observations.
    pub count: u32,
    /// Target of the most recent observation.
    pub last_target: Option<EntityId>,
    /// Context id of the most recent observation.
    pub last_context: Option<String>,
}

impl MetricAccumulator {
    /// An empty accumulator for `metric`.
    #[must_use]
    pub fn new(metric: LibIndex) -> Self {
        Self {
            metric,
            sum: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            last: 0.0,
            count: 0,
            last_target: None,
            last_context: None,
        }
    }

    /// Fold one observation in.
    pub fn observe(&mut self, value: f32, target: Option<EntityId>, context: Option<&str>) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        self.last_target = target;
        self.last_context = context.map(str::to_string);
    }

    /// Back to the identity state. Target and context are cleared too.
    pub fn reset(&mut self) {
        *self = Self::new(self.metric);
    }

    /// Reduce the period's observations according to `aggregation`.
    ///
    /// `interval` is the period length in seconds, used by `Rate`.
    #[must_use]
    pub fn aggregate(&self, aggregation: Aggregation, interval: f32) -> f32 {
        if self.count == 0 {
            return match aggregation {
                Aggregation::NoAggregation => self.last,
                _ => 0.0,
            };
        }
        match aggregation {
            Aggregation::NoAggregation => self.last,
            Aggregation::Average => self.sum / self.count as f32,
            Aggregation::Sum => self.sum,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::Count => self.count as f32,
            Aggregation::Rate => {
                if interval > 0.0 {
                    self.count as f32 / interval
                } else {
                    0.0
                }
            }
        }
    }
}

/// When a metric next flushes for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricTimer {
    /// Metric index.
    pub metric: LibIndex,
    /// Effective interval: authored interval times the profile scale.
    pub interval: f32,
    /// Simulated time of the next flush.
    pub next_sample_time: SimTime,
}

impl MetricTimer {
    /// Whether the timer has elapsed at `now`.
    #[must_use]
    pub fn is_due(&self, now: SimTime) -> bool {
        self.next_sample_time <= now
    }
}

/// An event-mode observation waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Metric index.
    pub metric: LibIndex,
    /// Observed value, not aggregated.
    pub value: f32,
    /// Observation target.
    pub target: Option<EntityId>,
    /// Observation context.
    pub context: Option<String>,
}

/// Map an aggregated value onto `[0, 1]`.
#[must_use]
pub fn normalize(value: f32, normalization: Normalization) -> f32 {
    match normalization {
        Normalization::Clamp01 => clamp01(value),
        Normalization::Invert01 => 1.0 - clamp01(value),
        Normalization::Signed01 => clamp01((value + 1.0) * 0.5),
        Normalization::Abs01 => clamp01(value.abs()),
    }
}

// ---------------------------------------------------------------------------
// Inbound / outbound records
// ---------------------------------------------------------------------------

/// One raw observation of a signal, as fed in by gameplay systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Signal index.
    pub signal: LibIndex,
    /// Observed value.
    pub value: f32,
    /// Other party of the observed event, if any.
    pub target: Option<EntityId>,
    /// Context id of the observed event, if any.
    pub context: Option<String>,
    /// Time of the observation.
    pub time: SimTime,
}

impl Observation {
    /// An observation of `signal` with `value` at `time`.
    #[must_use]
    pub fn new(signal: LibIndex, value: f32, time: SimTime) -> Self {
        Self {
            signal,
            value,
            target: None,
            context: None,
            time,
        }
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: EntityId) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the context id. Empty ids are treated as none.
    #[must_use]
    pub fn in_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = (!context.is_empty()).then_some(context);
        self
    }
}

/// A flushed, normalized sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric index.
    pub metric: LibIndex,
    /// Aggregated value.
    pub value: f32,
    /// Normalized value in `[0, 1]`.
    pub normalized: f32,
    /// Flush time.
    pub time: SimTime,
    /// Entity that owns the metric.
    pub subject: EntityId,
    /// Society root of `subject`.
    pub society_root: EntityId,
    /// Target of the most recent observation.
    pub target: Option<EntityId>,
    /// Context of the most recent observation.
    pub context: Option<String>,
    /// Whether the period had at least one observation. Only observed
    /// samples trigger rule evaluation.
    pub observed: bool,
}

/// Receiver of flushed samples.
pub trait SampleSink {
    /// Record one sample.
    fn record(&mut self, sample: &MetricSample);
}

impl SampleSink for Vec<MetricSample> {
    fn record(&mut self, sample: &MetricSample) {
        self.push(sample.clone());
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn record(&mut self, _sample: &MetricSample) {}
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Stateless sampling logic over [`EntityRuntime`] state.
#[derive(Debug, Clone, Default)]
pub struct MetricSampler {
    config: SamplerConfig,
}

impl MetricSampler {
    /// Create a sampler.
    #[must_use]
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Feed one observation to every metric `runtime` tracks for its signal.
    ///
    /// Returns how many metrics took the observation. Observations of
    /// signals finer than the entity's LOD tier are suppressed.
    pub fn observe(
        &self,
        ctx: &SimulationContext<'_>,
        runtime: &mut EntityRuntime,
        observation: &Observation,
    ) -> usize {
        let Some(signal) = ctx.library.signals.get(observation.signal as usize) else {
            return 0;
        };
        if !runtime.lod().allows(signal.minimum_lod) {
            trace!(signal = %signal.id, entity = %runtime.entity(), "Observation suppressed by LOD");
            return 0;
        }

        let mut taken = 0;
        for m in ctx.library.metric_range(observation.signal) {
            let metric_idx = m as LibIndex;
            match ctx.library.metrics[m].sampling_mode {
                SamplingMode::Aggregate => {
                    if let Some(acc) = runtime.accumulator_mut(metric_idx) {
                        acc.observe(
                            observation.value,
                            observation.target,
                            observation.context.as_deref(),
                        );
                        taken += 1;
                    }
                }
                SamplingMode::Event => {
                    if !runtime.tracks_event_metric(metric_idx) {
                        continue;
                    }
                    if runtime.pending_events().len() >= self.config.max_pending_events {
                        debug!(
                            entity = %runtime.entity(),
                            metric = %ctx.library.metrics[m].id,
                            "Pending event queue full, dropping observation"
                        );
                        continue;
                    }
                    runtime.push_pending(PendingEvent {
                        metric: metric_idx,
                        value: observation.value,
                        target: observation.target,
                        context: observation.context.clone(),
                    });
                    taken += 1;
                }
            }
        }
        taken
    }

    /// Emit every due sample of `runtime` into `out`.
    ///
    /// Queued event samples go first, then timer-driven aggregates in metric
    /// order. Returns the number of samples appended.
    pub fn flush(
        &self,
        ctx: &SimulationContext<'_>,
        runtime: &mut EntityRuntime,
        out: &mut Vec<MetricSample>,
    ) -> usize {
        let before = out.len();
        let subject = runtime.entity();
        let society_root = runtime.society_root();

        for event in runtime.drain_pending() {
            let Some(metric) = ctx.library.metrics.get(event.metric as usize) else {
                continue;
            };
            out.push(MetricSample {
                metric: event.metric,
                value: event.value,
                normalized: normalize(event.value, metric.normalization),
                time: ctx.now,
                subject,
                society_root,
                target: event.target,
                context: event.context,
                observed: true,
            });
        }

        let min_interval = f64::from(self.config.min_sample_interval.max(f32::EPSILON));
        let (timers, accumulators) = runtime.timers_and_accumulators_mut();
        for (timer, acc) in timers.iter_mut().zip(accumulators.iter_mut()) {
            if !timer.is_due(ctx.now) {
                continue;
            }
            let Some(metric) = ctx.library.metrics.get(timer.metric as usize) else {
                continue;
            };
            let value = acc.aggregate(metric.aggregation, timer.interval);
            out.push(MetricSample {
                metric: timer.metric,
                value,
                normalized: normalize(value, metric.normalization),
                time: ctx.now,
                subject,
                society_root,
                target: acc.last_target,
                context: acc.last_context.take(),
                observed: acc.count > 0,
            });
            acc.reset();
            timer.next_sample_time = ctx.now + f64::from(timer.interval).max(min_interval);
        }

        out.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(values: &[f32]) -> MetricAccumulator {
        let mut acc = MetricAccumulator::new(0);
        for &v in values {
            acc.observe(v, None, None);
        }
        acc
    }

    #[test]
    fn average_of_three() {
        let acc = filled(&[2.0, 4.0, 6.0]);
        assert!((acc.aggregate(Aggregation::Average, 1.0) - 4.0).abs() < f32::EPSILON);
        assert!((normalize(4.0, Normalization::Clamp01) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn every_aggregation() {
        let acc = filled(&[3.0, -1.0, 2.0]);
        assert!((acc.aggregate(Aggregation::NoAggregation, 1.0) - 2.0).abs() < f32::EPSILON);
        assert!((acc.aggregate(Aggregation::Sum, 1.0) - 4.0).abs() < f32::EPSILON);
        assert!((acc.aggregate(Aggregation::Min, 1.0) + 1.0).abs() < f32::EPSILON);
        assert!((acc.aggregate(Aggregation::Max, 1.0) - 3.0).abs() < f32::EPSILON);
        assert!((acc.aggregate(Aggregation::Count, 1.0) - 3.0).abs() < f32::EPSILON);
        assert!((acc.aggregate(Aggregation::Rate, 2.0) - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_period_is_zero() {
        let acc = MetricAccumulator::new(0);
        for agg in [
            Aggregation::Average,
            Aggregation::Min,
            Aggregation::Max,
            Aggregation::Rate,
            Aggregation::Count,
        ] {
            assert_eq!(acc.aggregate(agg, 1.0), 0.0);
        }
    }

    #[test]
    fn normalizations() {
        assert!((normalize(0.25, Normalization::Invert01) - 0.75).abs() < f32::EPSILON);
        assert!((normalize(-1.0, Normalization::Signed01)).abs() < f32::EPSILON);
        assert!((normalize(0.0, Normalization::Signed01) - 0.5).abs() < f32::EPSILON);
        assert!((normalize(1.0, Normalization::Signed01) - 1.0).abs() < f32::EPSILON);
        assert!((normalize(-0.4, Normalization::Abs01) - 0.4).abs() < f32::EPSILON);
        assert!((normalize(7.0, Normalization::Invert01)).abs() < f32::EPSILON);
    }

    #[test]
    fn reset_restores_identity() {
        let mut acc = filled(&[5.0]);
        acc.observe(1.0, Some(EntityId(3)), Some("market"));
        assert_eq!(acc.last_context.as_deref(), Some("market"));
        acc.reset();
        assert_eq!(acc, MetricAccumulator::new(0));
    }

    #[test]
    fn observation_empty_context_is_none() {
        let obs = Observation::new(0, 1.0, 0.0).in_context("");
        assert!(obs.context.is_none());
    }

    // -- Sampler over a compiled library --------------------------------

    use crate::definition::{
        DefinitionSet, MetricDefinition, MetricScope, SignalDefinition, SocietyProfileDefinition,
    };
    use crate::library::compiler::compile;
    use crate::library::RuntimeLibrary;
    use crate::profile::ProfileMask;
    use crate::types::LodTier;

    /// "gossip" is only heard at full detail; "famine" at every tier.
    fn lod_library() -> RuntimeLibrary {
        let mut set = DefinitionSet::new();
        set.signals.push(SignalDefinition::new("gossip").with_minimum_lod(LodTier::Full));
        set.signals.push(SignalDefinition::new("famine"));
        set.metrics.push(MetricDefinition::new("rumours", "gossip"));
        set.metrics.push(MetricDefinition::new("hunger", "famine"));
        set.metrics.push(MetricDefinition::new("outcry", "famine").sampled(SamplingMode::Event));
        compile(&set)
    }

    fn member(ctx: &SimulationContext<'_>, config: &SamplerConfig) -> EntityRuntime {
        EntityRuntime::new(ctx, EntityId(1), EntityId(0), MetricScope::Member, 1, config)
    }

    #[test]
    fn coarse_lod_suppresses_fine_signals() {
        let lib = lod_library();
        let gossip = lib.signal_index("gossip").expect("signal");
        let famine = lib.signal_index("famine").expect("signal");
        let sampler = MetricSampler::default();

        for (lod, expect_gossip) in [
            (LodTier::Full, 1),
            (LodTier::Simplified, 0),
            (LodTier::Aggregated, 0),
        ] {
            let mask = ProfileMask::compile(
                &SocietyProfileDefinition::new("village")
                    .at_lod(lod)
                    .with_metric("rumours")
                    .with_metric("hunger")
                    .with_metric("outcry"),
                &lib,
            );
            let ctx = SimulationContext::new(&lib, 0.0).with_mask(Some(&mask));
            let mut rt = member(&ctx, sampler.config());
            assert_eq!(rt.lod(), lod);
            assert_eq!(
                sampler.observe(&ctx, &mut rt, &Observation::new(gossip, 1.0, 0.0)),
                expect_gossip,
                "gossip at {lod:?}"
            );
            assert_eq!(
                sampler.observe(&ctx, &mut rt, &Observation::new(famine, 1.0, 0.0)),
                2,
                "famine at {lod:?}"
            );
        }
    }

    #[test]
    fn pending_events_are_capped() {
        let lib = lod_library();
        let famine = lib.signal_index("famine").expect("signal");
        let sampler = MetricSampler::new(SamplerConfig {
            max_pending_events: 3,
            ..SamplerConfig::default()
        });
        let ctx = SimulationContext::new(&lib, 0.0);
        let mut rt = member(&ctx, sampler.config());

        for i in 0..5 {
            let obs = Observation::new(famine, 0.1 * i as f32, 0.0).with_target(EntityId(9));
            sampler.observe(&ctx, &mut rt, &obs);
        }
        assert_eq!(rt.pending_events().len(), 3);

        let mut out = Vec::new();
        sampler.flush(&ctx.at(0.5), &mut rt, &mut out);
        let events: Vec<&MetricSample> = out
            .iter()
            .filter(|s| lib.metrics[s.metric as usize].sampling_mode == SamplingMode::Event)
            .collect();
        assert_eq!(events.len(), 3);
        assert!((events[2].value - 0.2).abs() < 1e-6);
        assert_eq!(events[0].target, Some(EntityId(9)));
        assert!((events[0].time - 0.5).abs() < f64::EPSILON);
        assert!(rt.pending_events().is_empty());
    }
}
