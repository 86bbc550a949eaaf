//! The tick, split into standalone systems.
//!
//! ## Tick phases
//!
//! | Phase            | Work                                            | Threads |
//! |------------------|-------------------------------------------------|---------|
//! | Clocks           | read each society's time                        | caller  |
//! | Signal delivery  | drain the queue into observations               | caller  |
//! | Evaluation       | flush due samples, roll rules, buffer commands  | rayon   |
//! | Apply            | record samples, apply commands in entity order  | caller  |
//!
//! Evaluation only touches per-entity state, so entities run in parallel.
//! Effects run afterwards in entity-id order, which keeps results identical
//! whether or not `world.parallel` is set. Signals emitted while applying
//! stay queued until the next tick's delivery phase.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info_span, warn};

use mores_core::effects::{self, EffectCommand};
use mores_core::evaluator::EvaluationReport;
use mores_core::metrics::spans;
use mores_core::{EntityId, MetricSample, Observation, RuntimeLibrary, SimulationContext};

use crate::clock::SocietyClock;
use crate::components::EntityRecord;
use crate::world::{society_mask, SocietyWorld};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Queued signals delivered.
    pub signals: usize,
    /// Samples flushed.
    pub samples: usize,
    /// Evaluation gate counts summed over entities.
    pub evaluation: EvaluationReport,
    /// Effects that changed state or dispatched a message.
    pub effects_applied: u64,
    /// Effects that missed their target.
    pub effects_missed: u64,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: f64,
}

/// Output of one entity's evaluation phase.
#[derive(Debug, Clone)]
pub struct EntityOutput {
    /// Entity evaluated.
    pub entity: EntityId,
    /// Samples flushed this tick.
    pub samples: Vec<MetricSample>,
    /// Buffered effects.
    pub commands: Vec<EffectCommand>,
    /// Gate counts.
    pub report: EvaluationReport,
}

/// Run every phase once.
pub fn run_tick(world: &mut SocietyWorld, clock: &dyn SocietyClock) -> TickReport {
    if !world.config.general.enabled {
        return TickReport::default();
    }
    let _span = info_span!(spans::TICK).entered();
    let start = Instant::now();

    read_clocks(world, clock);
    let signals = deliver_signals(world);
    let outputs = evaluate_entities(world);
    let mut report = apply_outputs(world, outputs);
    report.signals = signals;

    world.counters.ticks.fetch_add(1, Ordering::Relaxed);
    report.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    if world.config.telemetry.enabled {
        let over = world.monitor.record(report.elapsed_ms);
        if over && world.config.telemetry.log_slow_ticks {
            warn!(
                elapsed_ms = report.elapsed_ms,
                budget_ms = world.monitor.budget_ms(),
                entities = world.entities.len(),
                "Tick over budget"
            );
        }
    }
    report
}

/// Read the current time of every society.
pub fn read_clocks(world: &mut SocietyWorld, clock: &dyn SocietyClock) {
    for society in world.societies.values_mut() {
        society.now = clock.now(society.root);
        world.time = world.time.max(society.now);
    }
}

/// Turn up to `world.max_signals_per_tick` queued signals into
/// observations. Returns how many were drained.
pub fn deliver_signals(world: &mut SocietyWorld) -> usize {
    let _span = info_span!(spans::OBSERVE).entered();
    let batch = world
        .signals
        .drain_up_to(world.config.world.max_signals_per_tick);
    let drained = batch.len();

    for signal in batch {
        let Ok(time) = world.society_time(signal.subject) else {
            debug!(subject = %signal.subject, "Dropping signal for unknown entity");
            continue;
        };
        let observation = Observation {
            signal: signal.signal,
            value: signal.value,
            target: signal.target,
            context: signal.context,
            time,
        };
        if let Err(e) = world.observe(signal.subject, &observation) {
            debug!(error = %e, "Dropping queued signal");
        }
    }

    if !world.signals.is_empty() {
        debug!(remaining = world.signals.len(), "Signal queue over per-tick limit");
    }
    drained
}

/// Flush and evaluate every entity, in parallel when configured.
///
/// Outputs come back in entity-id order either way.
pub fn evaluate_entities(world: &mut SocietyWorld) -> Vec<EntityOutput> {
    let _span = info_span!(spans::EVALUATE).entered();
    let SocietyWorld {
        library,
        masks,
        config,
        sampler,
        evaluator,
        societies,
        entities,
        ..
    } = world;
    let library: &RuntimeLibrary = library;
    let (masks, societies, sampler, evaluator) = (&*masks, &*societies, &*sampler, &*evaluator);

    let run = |record: &mut EntityRecord| -> EntityOutput {
        let society = societies.get(&record.runtime.society_root());
        let ctx = SimulationContext::new(library, society.map_or(0.0, |s| s.now))
            .with_mask(society_mask(masks, society));
        let mut out = EntityOutput {
            entity: record.id(),
            samples: Vec::new(),
            commands: Vec::new(),
            report: EvaluationReport::default(),
        };
        out.report = record
            .runtime
            .tick(&ctx, sampler, evaluator, &mut out.samples, &mut out.commands);
        out
    };

    let mut records: Vec<&mut EntityRecord> = entities.values_mut().collect();
    if config.world.parallel {
        records.par_iter_mut().map(|r| run(r)).collect()
    } else {
        records.iter_mut().map(|r| run(r)).collect()
    }
}

/// Record samples and apply buffered commands, entity by entity.
pub fn apply_outputs(world: &mut SocietyWorld, outputs: Vec<EntityOutput>) -> TickReport {
    let _span = info_span!(spans::APPLY).entered();
    let library = Arc::clone(&world.library);
    let mut report = TickReport::default();

    for output in outputs {
        report.samples += output.samples.len();
        report.evaluation += output.report;
        world
            .counters
            .samples
            .fetch_add(output.samples.len() as u64, Ordering::Relaxed);
        world.counters.record_report(&output.report);

        for command in &output.commands {
            let outcome = effects::apply(&library, command, &mut *world);
            world.counters.record_outcome(outcome);
            if outcome.is_applied() {
                report.effects_applied += 1;
            } else {
                report.effects_missed += 1;
            }
        }

        if let Some(sink) = world.sink.as_mut() {
            for sample in &output.samples {
                sink.record(sample);
            }
        }
        if world.config.world.retain_samples {
            world.samples.extend(output.samples);
        }
    }
    report
}
