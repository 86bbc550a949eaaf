//! Synthetic workloads shared by the mores benchmarks.

use mores_core::definition::{
    Aggregation, EffectDefinition, EffectType, MetricDefinition, RuleDefinition,
    RuleSetDefinition, SamplingMode, SignalDefinition,
};
use mores_core::curve::ProbabilityCurve;
use mores_core::effects::ValueBuffer;
use mores_core::{DefinitionSet, MoresConfig};
use mores_world::SocietyWorld;

/// A library of `signals` signals, two metrics per signal (one aggregate,
/// one event) and `rules_per_metric` rules on each metric.
#[must_use]
pub fn synthetic_definitions(signals: usize, rules_per_metric: usize) -> DefinitionSet {
    let mut set = DefinitionSet::new();
    set.effects.push(
        EffectDefinition::new("calm", EffectType::ModifyNeed, "calm", -0.05).clamped(0.0, 1.0),
    );
    set.effects.push(EffectDefinition::new("gold", EffectType::ModifyResource, "gold", 1.0));

    for s in 0..signals {
        let signal = format!("signal_{s}");
        set.signals.push(SignalDefinition::new(signal.clone()));
        set.metrics.push(
            MetricDefinition::new(format!("avg_{s}"), signal.clone())
                .aggregated(Aggregation::Average),
        );
        set.metrics.push(
            MetricDefinition::new(format!("evt_{s}"), signal).sampled(SamplingMode::Event),
        );

        let mut rules = RuleSetDefinition::new(format!("rules_{s}"));
        for r in 0..rules_per_metric {
            let effect = if r % 2 == 0 { "calm" } else { "gold" };
            rules = rules
                .with_rule(
                    RuleDefinition::new(format!("avg_{s}"))
                        .with_curve(ProbabilityCurve::linear())
                        .with_cooldown(2.0)
                        .with_effect(effect),
                )
                .with_rule(
                    RuleDefinition::new(format!("evt_{s}"))
                        .with_weight(0.5)
                        .with_effect(effect),
                );
        }
        set.rule_sets.push(rules);
    }
    set
}

/// A world of `societies` societies with `members` members each, every
/// member carrying needs and resources.
#[must_use]
pub fn populated_world(
    definitions: &DefinitionSet,
    config: MoresConfig,
    societies: u32,
    members: u32,
) -> SocietyWorld {
    let mut world = SocietyWorld::from_definitions(definitions, config);
    for s in 0..societies {
        let root = world.spawn_society(None, s + 1);
        for m in 0..members {
            let Ok(id) = world.spawn_member(root, s * members + m + 1) else {
                continue;
            };
            // Ids come from spawn_member, so the setters cannot fail.
            let _ = world.set_needs(id, ValueBuffer::new().with("calm", 1.0));
            let _ = world.set_resources(id, ValueBuffer::new());
        }
    }
    world
}
