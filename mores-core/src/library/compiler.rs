//! Library compiler: [`DefinitionSet`] -> [`RuntimeLibrary`].
//!
//! The compiler is tolerant. Anything that does not resolve is dropped and
//! reported as a [`CompileDiagnostic`]; compilation itself cannot fail.
//!
//! Pass order:
//!
//! 1. Deduplicate signals, domains, effects, metrics and rule sets by id
//!    (case-sensitive, first occurrence wins).
//! 2. Resolve domain links, `EmitSignal` targets and metric signals; drop
//!    effects and metrics whose signal is unknown.
//! 3. Stable-sort metrics by signal index, then assign metric indices.
//! 4. Compile rules: resolve the metric, resolve each rule effect, drop rules
//!    with no effects, bake the curve.
//! 5. Stable-sort rules by metric index, then build rule and metric groups
//!    in one linear pass each.
//! 6. Flatten domains into range + index tables.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, info_span, warn};

use super::diagnostics::{CompileDiagnostic, RecordKind};
use super::{
    CompiledDomain, CompiledEffect, CompiledMetric, CompiledRule, CompiledRuleEffect,
    CompiledRuleSet, CompiledSignal, MetricGroup, RuleGroup, RuntimeLibrary,
};
use crate::config::CompilerConfig;
use crate::curve::{self, MIN_CURVE_SAMPLES};
use crate::definition::{DefinitionSet, EffectType};
use crate::metrics::spans;
use crate::types::LibIndex;

/// Compiles definition working sets into runtime libraries.
#[derive(Debug, Clone, Default)]
pub struct LibraryCompiler {
    config: CompilerConfig,
}

/// Compile `definitions` with the default configuration.
#[must_use]
pub fn compile(definitions: &DefinitionSet) -> RuntimeLibrary {
    LibraryCompiler::default().compile(definitions)
}

impl LibraryCompiler {
    /// Create a compiler with `config`.
    #[must_use]
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Compile, logging diagnostics through `tracing` only.
    #[must_use]
    pub fn compile(&self, definitions: &DefinitionSet) -> RuntimeLibrary {
        self.compile_with_diagnostics(definitions, &mut |_| {})
    }

    /// Compile, additionally passing every diagnostic to `on_diagnostic`.
    pub fn compile_with_diagnostics(
        &self,
        definitions: &DefinitionSet,
        on_diagnostic: &mut dyn FnMut(&CompileDiagnostic),
    ) -> RuntimeLibrary {
        let _span = info_span!(spans::COMPILE).entered();
        let mut report = |d: CompileDiagnostic| {
            if d.is_drop() {
                warn!(diagnostic = %d, "Library compile dropped a reference");
            } else {
                debug!(diagnostic = %d, "Library compile note");
            }
            on_diagnostic(&d);
        };

        let samples = self.config.curve_samples.max(MIN_CURVE_SAMPLES);
        if samples != self.config.curve_samples {
            report(CompileDiagnostic::DegenerateSampleCount {
                requested: self.config.curve_samples,
                used: samples,
            });
        }
        let min_interval = self.config.min_sample_interval.max(f32::EPSILON);

        let mut lib = RuntimeLibrary {
            curve_samples: samples as u32,
            ..RuntimeLibrary::default()
        };

        let domains = dedupe(&definitions.domains, |d| &d.id, RecordKind::Domain, &mut report);
        let signals = dedupe(&definitions.signals, |s| &s.id, RecordKind::Signal, &mut report);
        let rule_sets = dedupe(&definitions.rule_sets, |r| &r.id, RecordKind::RuleSet, &mut report);
        let effects = dedupe(&definitions.effects, |e| &e.id, RecordKind::Effect, &mut report);
        let metrics = dedupe(&definitions.metrics, |m| &m.id, RecordKind::Metric, &mut report);

        // --- Domains first: signals and rule sets link to them. ---
        let domain_index = index_map(domains.iter().map(|d| d.id.as_str()));
        let mut resolve_domain = |kind: RecordKind, id: &str, domain_id: &str| {
            if domain_id.is_empty() {
                return None;
            }
            let found = domain_index.get(domain_id).copied();
            if found.is_none() {
                report(CompileDiagnostic::UnresolvedDomain {
                    kind,
                    id: id.to_string(),
                    domain_id: domain_id.to_string(),
                });
            }
            found
        };

        // --- Signals ---
        for s in &signals {
            lib.signals.push(CompiledSignal {
                id: s.id.clone(),
                domain: resolve_domain(RecordKind::Signal, &s.id, &s.domain_id),
                minimum_lod: s.minimum_lod,
                default_weight: s.default_weight,
            });
        }
        let signal_index = index_map(lib.signals.iter().map(|s| s.id.as_str()));

        // --- Rule sets (records only; rules are compiled below) ---
        for r in &rule_sets {
            lib.rule_sets.push(CompiledRuleSet {
                id: r.id.clone(),
                domain: resolve_domain(RecordKind::RuleSet, &r.id, &r.domain_id),
                enabled: r.enabled,
            });
        }
        let rule_set_index = index_map(lib.rule_sets.iter().map(|r| r.id.as_str()));

        // --- Effects ---
        for e in effects {
            let signal = if e.effect_type == EffectType::EmitSignal {
                let Some(&s) = signal_index.get(e.parameter_id.as_str()) else {
                    report(CompileDiagnostic::UnresolvedEmitSignal {
                        effect_id: e.id.clone(),
                        signal_id: e.parameter_id.clone(),
                    });
                    continue;
                };
                Some(s)
            } else {
                None
            };
            lib.effects.push(CompiledEffect {
                id: e.id.clone(),
                effect_type: e.effect_type,
                target: e.target,
                parameter_id: e.parameter_id.clone(),
                secondary_id: e.secondary_id.clone(),
                tertiary_id: e.tertiary_id.clone(),
                signal,
                magnitude: e.magnitude,
                use_clamp: e.use_clamp,
                min_value: e.min_value,
                max_value: e.max_value,
            });
        }
        let effect_index = index_map(lib.effects.iter().map(|e| e.id.as_str()));

        // --- Metrics: resolve, then order by signal ---
        for m in metrics {
            let Some(&signal) = signal_index.get(m.signal_id.as_str()) else {
                report(CompileDiagnostic::UnresolvedSignal {
                    metric_id: m.id.clone(),
                    signal_id: m.signal_id.clone(),
                });
                continue;
            };
            lib.metrics.push(CompiledMetric {
                id: m.id.clone(),
                signal,
                sample_interval: sanitize_interval(m.sample_interval, min_interval),
                sampling_mode: m.sampling_mode,
                scope: m.scope,
                aggregation: m.aggregation,
                normalization: m.normalization,
            });
        }
        lib.metrics.sort_by_key(|m| m.signal);
        let metric_index = index_map(lib.metrics.iter().map(|m| m.id.as_str()));

        // --- Rules ---
        let mut declaration_order: LibIndex = 0;
        for set in &rule_sets {
            let Some(&set_idx) = rule_set_index.get(set.id.as_str()) else {
                continue;
            };
            for (position, rule) in set.rules.iter().enumerate() {
                let Some(&metric) = metric_index.get(rule.metric_id.as_str()) else {
                    report(CompileDiagnostic::UnresolvedMetric {
                        rule_set_id: set.id.clone(),
                        rule_position: position,
                        metric_id: rule.metric_id.clone(),
                    });
                    continue;
                };

                let mut resolved = Vec::with_capacity(rule.effects.len());
                for re in &rule.effects {
                    match effect_index.get(re.effect_id.as_str()) {
                        Some(&effect) => resolved.push(CompiledRuleEffect {
                            effect,
                            weight: re.weight,
                        }),
                        None => report(CompileDiagnostic::UnresolvedEffect {
                            rule_set_id: set.id.clone(),
                            rule_position: position,
                            effect_id: re.effect_id.clone(),
                        }),
                    }
                }
                if resolved.is_empty() {
                    report(CompileDiagnostic::EmptyRule {
                        rule_set_id: set.id.clone(),
                        rule_position: position,
                    });
                    continue;
                }

                let curve_idx = lib.curves.len() as LibIndex;
                lib.curves.push(curve::bake(&rule.probability_curve, samples));

                let effect_start = lib.rule_effects.len() as LibIndex;
                let effect_len = resolved.len() as LibIndex;
                lib.rule_effects.extend(resolved);

                lib.rules.push(CompiledRule {
                    rule_set: set_idx,
                    metric,
                    context_filter: rule.context_id_filter.clone().filter(|c| !c.is_empty()),
                    curve: curve_idx,
                    weight: rule.weight,
                    cooldown_seconds: rule.cooldown_seconds.max(0.0),
                    effect_start,
                    effect_len,
                    declaration_order,
                });
                declaration_order += 1;
            }
        }
        // Stable: equal metrics keep declaration order.
        lib.rules.sort_by_key(|r| r.metric);

        lib.rule_groups = group_runs(lib.rules.iter().map(|r| r.metric))
            .map(|(metric, start, len)| RuleGroup { metric, start, len })
            .collect();
        lib.metric_groups = group_runs(lib.metrics.iter().map(|m| m.signal))
            .map(|(signal, start, len)| MetricGroup { signal, start, len })
            .collect();

        // --- Domains ---
        for d in &domains {
            let start = lib.domain_rule_sets.len() as LibIndex;
            let mut seen = HashSet::new();
            for rs_id in &d.rule_set_ids {
                match rule_set_index.get(rs_id.as_str()) {
                    Some(&rs) => {
                        if seen.insert(rs) {
                            lib.domain_rule_sets.push(rs);
                        }
                    }
                    None => report(CompileDiagnostic::UnresolvedRuleSet {
                        domain_id: d.id.clone(),
                        rule_set_id: rs_id.clone(),
                    }),
                }
            }
            lib.domains.push(CompiledDomain {
                id: d.id.clone(),
                start,
                len: lib.domain_rule_sets.len() as LibIndex - start,
            });
        }

        lib.rebuild_lookups();

        info!(
            signals = lib.signals.len(),
            metrics = lib.metrics.len(),
            effects = lib.effects.len(),
            rule_sets = lib.rule_sets.len(),
            rules = lib.rules.len(),
            domains = lib.domains.len(),
            "Compiled runtime library"
        );
        lib
    }
}

/// Keep the first record per id, preserving order.
fn dedupe<'a, T>(
    items: &'a [T],
    id: impl Fn(&T) -> &String,
    kind: RecordKind,
    report: &mut impl FnMut(CompileDiagnostic),
) -> Vec<&'a T> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(id(item).as_str()) {
            out.push(item);
        } else {
            report(CompileDiagnostic::DuplicateId {
                kind,
                id: id(item).clone(),
            });
        }
    }
    out
}

fn index_map<'a>(ids: impl Iterator<Item = &'a str>) -> HashMap<&'a str, LibIndex> {
    ids.enumerate().map(|(i, id)| (id, i as LibIndex)).collect()
}

fn sanitize_interval(interval: f32, min: f32) -> f32 {
    if interval.is_finite() { interval.max(min) } else { min }
}

/// Collapse a key sequence into `(key, start, len)` runs of equal keys.
fn group_runs(
    keys: impl Iterator<Item = LibIndex>,
) -> impl Iterator<Item = (LibIndex, LibIndex, LibIndex)> {
    let mut runs: Vec<(LibIndex, LibIndex, LibIndex)> = Vec::new();
    for (i, key) in keys.enumerate() {
        match runs.last_mut() {
            Some((k, _, len)) if *k == key => *len += 1,
            _ => runs.push((key, i as LibIndex, 1)),
        }
    }
    runs.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::ProbabilityCurve;
    use crate::definition::{
        DomainDefinition, EffectDefinition, MetricDefinition, RuleDefinition, RuleEffectDefinition,
        RuleSetDefinition, SignalDefinition,
    };

    fn base() -> DefinitionSet {
        let mut set = DefinitionSet::new();
        set.signals.push(SignalDefinition::new("chatter"));
        set.signals.push(SignalDefinition::new("theft"));
        set.metrics.push(MetricDefinition::new("theft_rate", "theft"));
        set.metrics.push(MetricDefinition::new("chatter_avg", "chatter"));
        set.effects.push(EffectDefinition::new("calm", EffectType::ModifyNeed, "calm", 0.1));
        set.effects.push(EffectDefinition::new("fear", EffectType::ModifyNeed, "safety", -0.2));
        set
    }

    /// Records the name of every span opened while installed.
    #[derive(Default)]
    struct SpanNames(parking_lot::Mutex<Vec<&'static str>>);

    impl tracing::Subscriber for SpanNames {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }
        fn new_span(&self, attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            let mut names = self.0.lock();
            names.push(attrs.metadata().name());
            tracing::span::Id::from_u64(names.len() as u64)
        }
        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
        fn event(&self, _: &tracing::Event<'_>) {}
        fn enter(&self, _: &tracing::span::Id) {}
        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn compile_runs_inside_its_span() {
        let names = std::sync::Arc::new(SpanNames::default());
        tracing::subscriber::with_default(std::sync::Arc::clone(&names), || {
            compile(&base());
        });
        assert!(names.0.lock().contains(&spans::COMPILE));
    }

    #[test]
    fn empty_set_compiles_to_empty_library() {
        let lib = compile(&DefinitionSet::new());
        assert!(lib.rules.is_empty());
        assert!(lib.validate().is_empty());
    }

    #[test]
    fn duplicates_first_wins() {
        let mut set = base();
        let mut dup = SignalDefinition::new("chatter");
        dup.default_weight = 9.0;
        set.signals.push(dup);
        let mut diags = Vec::new();
        let lib = LibraryCompiler::default().compile_with_diagnostics(&set, &mut |d| diags.push(d.clone()));
        assert_eq!(lib.signals.len(), 2);
        assert!((lib.signals[0].default_weight - 1.0).abs() < f32::EPSILON);
        assert!(diags.iter().any(|d| matches!(d, CompileDiagnostic::DuplicateId { kind: RecordKind::Signal, .. })));
    }

    #[test]
    fn metrics_sorted_by_signal() {
        let lib = compile(&base());
        // chatter is signal 0, so its metric sorts first despite later declaration.
        assert_eq!(lib.metrics[0].id, "chatter_avg");
        assert_eq!(lib.metrics[1].id, "theft_rate");
        assert_eq!(lib.metric_index("theft_rate"), Some(1));
        assert_eq!(lib.metric_groups.len(), 2);
        assert_eq!(lib.metrics_for_signal(1)[0].id, "theft_rate");
    }

    #[test]
    fn unresolved_signal_drops_metric() {
        let mut set = base();
        set.metrics.push(MetricDefinition::new("ghost", "nowhere"));
        let lib = compile(&set);
        assert!(lib.metric_index("ghost").is_none());
        assert_eq!(lib.metrics.len(), 2);
    }

    #[test]
    fn rule_effects_skipped_individually() {
        let mut set = base();
        set.rule_sets.push(
            RuleSetDefinition::new("rs").with_rule(
                RuleDefinition::new("theft_rate")
                    .with_effect("missing")
                    .with_effect("fear"),
            ),
        );
        let lib = compile(&set);
        assert_eq!(lib.rules.len(), 1);
        let effects = lib.rule_effects(&lib.rules[0]);
        assert_eq!(effects.len(), 1);
        assert_eq!(lib.effects[effects[0].effect as usize].id, "fear");
    }

    #[test]
    fn rule_with_no_resolvable_effects_dropped() {
        let mut set = base();
        set.rule_sets.push(
            RuleSetDefinition::new("rs")
                .with_rule(RuleDefinition::new("theft_rate").with_effect("missing"))
                .with_rule(RuleDefinition::new("ghost_metric").with_effect("fear")),
        );
        let mut diags = Vec::new();
        let lib = LibraryCompiler::default().compile_with_diagnostics(&set, &mut |d| diags.push(d.clone()));
        assert!(lib.rules.is_empty());
        assert!(lib.curves.is_empty());
        assert!(lib.rule_effects.is_empty());
        assert!(diags.iter().any(|d| matches!(d, CompileDiagnostic::EmptyRule { .. })));
        assert!(diags.iter().any(|d| matches!(d, CompileDiagnostic::UnresolvedMetric { .. })));
    }

    #[test]
    fn rules_grouped_by_metric_in_declaration_order() {
        let mut set = base();
        set.rule_sets.push(
            RuleSetDefinition::new("a")
                .with_rule(RuleDefinition::new("theft_rate").with_effect("fear").with_weight(0.1))
                .with_rule(RuleDefinition::new("chatter_avg").with_effect("calm").with_weight(0.2)),
        );
        set.rule_sets.push(
            RuleSetDefinition::new("b")
                .with_rule(RuleDefinition::new("theft_rate").with_effect("calm").with_weight(0.3)),
        );
        let lib = compile(&set);
        assert!(lib.validate().is_empty(), "{:?}", lib.validate());
        let theft = lib.metric_index("theft_rate").expect("metric");
        let rules = lib.rules_for_metric(theft);
        assert_eq!(rules.len(), 2);
        assert!((rules[0].weight - 0.1).abs() < f32::EPSILON);
        assert!((rules[1].weight - 0.3).abs() < f32::EPSILON);
        assert_eq!(lib.rule_groups.len(), 2);
        assert_eq!(lib.rule_groups[0].metric, lib.metric_index("chatter_avg").expect("metric"));
    }

    #[test]
    fn curves_baked_to_configured_length() {
        let mut set = base();
        set.rule_sets.push(RuleSetDefinition::new("rs").with_rule(
            RuleDefinition::new("theft_rate")
                .with_curve(ProbabilityCurve::from_points(&[(0.0, 2.0), (1.0, -1.0)]))
                .with_effect("fear"),
        ));
        let compiler = LibraryCompiler::new(CompilerConfig {
            curve_samples: 2,
            ..CompilerConfig::default()
        });
        let mut diags = Vec::new();
        let lib = compiler.compile_with_diagnostics(&set, &mut |d| diags.push(d.clone()));
        assert_eq!(lib.curve_samples, 4);
        assert_eq!(lib.curve(0).len(), 4);
        assert!(lib.curve(0).iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(diags.contains(&CompileDiagnostic::DegenerateSampleCount { requested: 2, used: 4 }));
    }

    #[test]
    fn domains_dedupe_members_and_skip_unknown() {
        let mut set = base();
        set.rule_sets.push(RuleSetDefinition::new("a"));
        set.rule_sets.push(RuleSetDefinition::new("b"));
        set.domains.push(DomainDefinition::new("d1", ["b", "a", "b", "zzz"]));
        set.domains.push(DomainDefinition::new("d2", ["a"]));
        let lib = compile(&set);
        assert_eq!(lib.rule_sets_for_domain(0), &[1, 0]);
        assert_eq!(lib.rule_sets_for_domain(1), &[0]);
        assert!(lib.validate().is_empty());
    }

    #[test]
    fn emit_signal_effect_resolves_or_drops() {
        let mut set = base();
        set.effects.push(EffectDefinition::new("gossip", EffectType::EmitSignal, "chatter", 1.0));
        set.effects.push(EffectDefinition::new("rumor", EffectType::EmitSignal, "nope", 1.0));
        let lib = compile(&set);
        let gossip = lib.effect_index("gossip").expect("kept");
        assert_eq!(lib.effects[gossip as usize].signal, Some(0));
        assert!(lib.effect_index("rumor").is_none());
    }

    #[test]
    fn empty_context_filter_means_none() {
        let mut set = base();
        let mut rule = RuleDefinition::new("theft_rate").with_effect("fear");
        rule.context_id_filter = Some(String::new());
        set.rule_sets.push(RuleSetDefinition::new("rs").with_rule(rule));
        let lib = compile(&set);
        assert!(lib.rules[0].context_filter.is_none());
    }

    #[test]
    fn interval_floored() {
        let mut set = base();
        set.metrics[0].sample_interval = 0.0;
        set.metrics[1].sample_interval = f32::NAN;
        let lib = compile(&set);
        assert!(lib.metrics.iter().all(|m| m.sample_interval >= 0.01));
    }

    #[test]
    fn rule_effect_weight_carried() {
        let mut set = base();
        let mut rule = RuleDefinition::new("theft_rate");
        rule.effects.push(RuleEffectDefinition { effect_id: "fear".into(), weight: 0.25 });
        set.rule_sets.push(RuleSetDefinition::new("rs").with_rule(rule));
        let lib = compile(&set);
        assert!((lib.rule_effects[0].weight - 0.25).abs() < f32::EPSILON);
    }
}
