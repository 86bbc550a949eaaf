//! The compiled, immutable runtime library.
//!
//! Every table is a flat array; every cross-reference is a zero-based
//! [`LibIndex`] into another table. Optional references are `Option<LibIndex>`.
//! Range tables (`RuleGroup`, `MetricGroup`, `CompiledDomain`) are sorted by
//! key and cover contiguous, non-overlapping slices.
//!
//! ```text
//!   metrics[m] ──signal──▶ signals[s]
//!   rule_groups[g] = { metric m, start, len } ──▶ rules[start..start+len]
//!   rules[r] ──effects──▶ rule_effects[es..es+el] ──effect──▶ effects[e]
//!   rules[r] ──curve──▶ curves[c]
//!   domains[d] ──▶ domain_rule_sets[ds..ds+dl] ──▶ rule_sets[rs]
//! ```

pub mod compiler;
pub mod diagnostics;

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::curve;
use crate::definition::{
    Aggregation, EffectTargetKind, EffectType, MetricScope, Normalization, SamplingMode,
};
use crate::types::{LibIndex, LodTier};

// ---------------------------------------------------------------------------
// Compiled records
// ---------------------------------------------------------------------------

/// A compiled signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledSignal {
    /// Authored id.
    pub id: String,
    /// Owning domain, if it resolved.
    pub domain: Option<LibIndex>,
    /// Coarsest LOD tier that still observes the signal.
    pub minimum_lod: LodTier,
    /// Value used when raised without an explicit value.
    pub default_weight: f32,
}

/// A compiled metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledMetric {
    /// Authored id.
    pub id: String,
    /// Source signal.
    pub signal: LibIndex,
    /// Seconds between flushes, already floored to the minimum interval.
    pub sample_interval: f32,
    /// Aggregate or per-event sampling.
    pub sampling_mode: SamplingMode,
    /// Society or member tracking.
    pub scope: MetricScope,
    /// Period reduction.
    pub aggregation: Aggregation,
    /// Output mapping.
    pub normalization: Normalization,
}

/// A compiled effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledEffect {
    /// Authored id.
    pub id: String,
    /// Effect kind.
    pub effect_type: EffectType,
    /// Target selection.
    pub target: EffectTargetKind,
    /// Primary key.
    pub parameter_id: String,
    /// Secondary key.
    pub secondary_id: String,
    /// Tertiary key.
    pub tertiary_id: String,
    /// Resolved signal for `EmitSignal` effects.
    pub signal: Option<LibIndex>,
    /// Scale on the normalized sample.
    pub magnitude: f32,
    /// Whether the written value is bounded.
    pub use_clamp: bool,
    /// Lower bound.
    pub min_value: f32,
    /// Upper bound.
    pub max_value: f32,
}

impl CompiledEffect {
    /// Apply the effect's clamp, if any.
    #[must_use]
    pub fn clamp(&self, v: f32) -> f32 {
        if self.use_clamp {
            v.clamp(self.min_value.min(self.max_value), self.max_value.max(self.min_value))
        } else {
            v
        }
    }
}

/// A compiled rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRuleSet {
    /// Authored id.
    pub id: String,
    /// Owning domain, if it resolved.
    pub domain: Option<LibIndex>,
    /// Authoring kill switch.
    pub enabled: bool,
}

/// A compiled rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRule {
    /// Rule set that declared the rule.
    pub rule_set: LibIndex,
    /// Metric the rule listens to.
    pub metric: LibIndex,
    /// Required context id, if any. Never `Some("")`.
    pub context_filter: Option<String>,
    /// Baked probability curve.
    pub curve: LibIndex,
    /// Multiplier on the curve value.
    pub weight: f32,
    /// Minimum seconds between firings per entity.
    pub cooldown_seconds: f32,
    /// First entry in `rule_effects`.
    pub effect_start: LibIndex,
    /// Number of entries in `rule_effects`; always at least 1.
    pub effect_len: LibIndex,
    /// Position among all compiled rules before sorting by metric.
    pub declaration_order: LibIndex,
}

impl CompiledRule {
    /// Range of this rule's entries in `rule_effects`.
    #[must_use]
    pub fn effect_range(&self) -> Range<usize> {
        let start = self.effect_start as usize;
        start..start + self.effect_len as usize
    }
}

/// One resolved effect reference of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompiledRuleEffect {
    /// Effect to apply.
    pub effect: LibIndex,
    /// Authored weight, carried for downstream intensity scaling.
    pub weight: f32,
}

/// Contiguous range of rules sharing one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroup {
    /// Metric key.
    pub metric: LibIndex,
    /// First rule.
    pub start: LibIndex,
    /// Number of rules.
    pub len: LibIndex,
}

/// Contiguous range of metrics sharing one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricGroup {
    /// Signal key.
    pub signal: LibIndex,
    /// First metric.
    pub start: LibIndex,
    /// Number of metrics.
    pub len: LibIndex,
}

/// A compiled domain: a range into `domain_rule_sets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledDomain {
    /// Authored id.
    pub id: String,
    /// First entry in `domain_rule_sets`.
    pub start: LibIndex,
    /// Number of member rule sets.
    pub len: LibIndex,
}

fn span(start: LibIndex, len: LibIndex) -> Range<usize> {
    start as usize..start as usize + len as usize
}

// ---------------------------------------------------------------------------
// RuntimeLibrary
// ---------------------------------------------------------------------------

/// The immutable product of one compilation.
///
/// Share it behind an `Arc`; nothing mutates it after
/// [`LibraryCompiler::compile`](compiler::LibraryCompiler::compile) returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeLibrary {
    /// Signals in declaration order.
    pub signals: Vec<CompiledSignal>,
    /// Metrics sorted by signal index, then declaration order.
    pub metrics: Vec<CompiledMetric>,
    /// Effects in declaration order.
    pub effects: Vec<CompiledEffect>,
    /// Rule sets in declaration order.
    pub rule_sets: Vec<CompiledRuleSet>,
    /// Rules sorted by metric index, then declaration order.
    pub rules: Vec<CompiledRule>,
    /// Flat effect lists referenced by rules.
    pub rule_effects: Vec<CompiledRuleEffect>,
    /// Rule ranges keyed by metric, ascending.
    pub rule_groups: Vec<RuleGroup>,
    /// Metric ranges keyed by signal, ascending.
    pub metric_groups: Vec<MetricGroup>,
    /// Domains in declaration order.
    pub domains: Vec<CompiledDomain>,
    /// Flat rule set lists referenced by domains.
    pub domain_rule_sets: Vec<LibIndex>,
    /// Baked probability curves, each `curve_samples` long.
    pub curves: Vec<Vec<f32>>,
    /// Samples per baked curve.
    pub curve_samples: u32,
    #[serde(skip)]
    lookups: Lookups,
}

/// Derived tables, rebuilt per instance and never serialized.
#[derive(Debug, Clone, Default)]
struct Lookups {
    rules_by_metric: Vec<Range<usize>>,
    metrics_by_signal: Vec<Range<usize>>,
    signal_ids: HashMap<String, LibIndex>,
    metric_ids: HashMap<String, LibIndex>,
    effect_ids: HashMap<String, LibIndex>,
    rule_set_ids: HashMap<String, LibIndex>,
    domain_ids: HashMap<String, LibIndex>,
}

fn id_map<'a>(ids: impl Iterator<Item = &'a str>) -> HashMap<String, LibIndex> {
    ids.enumerate()
        .map(|(i, id)| (id.to_string(), i as LibIndex))
        .collect()
}

impl RuntimeLibrary {
    /// Build the O(1) lookup tables. Called by the compiler and after loading
    /// a baked library.
    pub fn rebuild_lookups(&mut self) {
        let mut rules_by_metric = vec![0..0; self.metrics.len()];
        for g in &self.rule_groups {
            if let Some(slot) = rules_by_metric.get_mut(g.metric as usize) {
                *slot = span(g.start, g.len);
            }
        }
        let mut metrics_by_signal = vec![0..0; self.signals.len()];
        for g in &self.metric_groups {
            if let Some(slot) = metrics_by_signal.get_mut(g.signal as usize) {
                *slot = span(g.start, g.len);
            }
        }
        self.lookups = Lookups {
            rules_by_metric,
            metrics_by_signal,
            signal_ids: id_map(self.signals.iter().map(|s| s.id.as_str())),
            metric_ids: id_map(self.metrics.iter().map(|m| m.id.as_str())),
            effect_ids: id_map(self.effects.iter().map(|e| e.id.as_str())),
            rule_set_ids: id_map(self.rule_sets.iter().map(|r| r.id.as_str())),
            domain_ids: id_map(self.domains.iter().map(|d| d.id.as_str())),
        };
    }

    /// Index of the signal with `id`.
    #[must_use]
    pub fn signal_index(&self, id: &str) -> Option<LibIndex> {
        self.lookups.signal_ids.get(id).copied()
    }

    /// Index of the metric with `id`.
    #[must_use]
    pub fn metric_index(&self, id: &str) -> Option<LibIndex> {
        self.lookups.metric_ids.get(id).copied()
    }

    /// Index of the effect with `id`.
    #[must_use]
    pub fn effect_index(&self, id: &str) -> Option<LibIndex> {
        self.lookups.effect_ids.get(id).copied()
    }

    /// Index of the rule set with `id`.
    #[must_use]
    pub fn rule_set_index(&self, id: &str) -> Option<LibIndex> {
        self.lookups.rule_set_ids.get(id).copied()
    }

    /// Index of the domain with `id`.
    #[must_use]
    pub fn domain_index(&self, id: &str) -> Option<LibIndex> {
        self.lookups.domain_ids.get(id).copied()
    }

    /// Rule index range evaluated when `metric` samples. Empty for unknown metrics.
    #[must_use]
    pub fn rule_range(&self, metric: LibIndex) -> Range<usize> {
        self.lookups
            .rules_by_metric
            .get(metric as usize)
            .cloned()
            .unwrap_or(0..0)
    }

    /// Rules evaluated when `metric` samples, in priority order.
    #[must_use]
    pub fn rules_for_metric(&self, metric: LibIndex) -> &[CompiledRule] {
        &self.rules[self.rule_range(metric)]
    }

    /// Metric index range fed by `signal`. Empty for unknown signals.
    #[must_use]
    pub fn metric_range(&self, signal: LibIndex) -> Range<usize> {
        self.lookups
            .metrics_by_signal
            .get(signal as usize)
            .cloned()
            .unwrap_or(0..0)
    }

    /// Metrics fed by `signal`.
    #[must_use]
    pub fn metrics_for_signal(&self, signal: LibIndex) -> &[CompiledMetric] {
        &self.metrics[self.metric_range(signal)]
    }

    /// Rule set indices belonging to `domain`.
    #[must_use]
    pub fn rule_sets_for_domain(&self, domain: LibIndex) -> &[LibIndex] {
        self.domains
            .get(domain as usize)
            .map_or(&[] as &[LibIndex], |d| &self.domain_rule_sets[span(d.start, d.len)])
    }

    /// Resolved effect references of `rule`.
    #[must_use]
    pub fn rule_effects(&self, rule: &CompiledRule) -> &[CompiledRuleEffect] {
        &self.rule_effects[rule.effect_range()]
    }

    /// Baked table for curve `index`. Empty for unknown curves.
    #[must_use]
    pub fn curve(&self, index: LibIndex) -> &[f32] {
        self.curves.get(index as usize).map_or(&[] as &[f32], Vec::as_slice)
    }

    /// Curve probability of `rule` at normalized value `x`.
    #[must_use]
    pub fn curve_probability(&self, rule: &CompiledRule, x: f32) -> f32 {
        curve::sample_baked(self.curve(rule.curve), x)
    }

    /// Check every structural invariant. Returns human-readable violations.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let n_signals = self.signals.len();
        let n_domains = self.domains.len();

        for (i, s) in self.signals.iter().enumerate() {
            if s.domain.is_some_and(|d| d as usize >= n_domains) {
                violations.push(format!("signal {i} references missing domain"));
            }
        }
        for (i, m) in self.metrics.iter().enumerate() {
            if m.signal as usize >= n_signals {
                violations.push(format!("metric {i} references missing signal"));
            }
            if i > 0 && self.metrics[i - 1].signal > m.signal {
                violations.push(format!("metric {i} out of signal order"));
            }
        }
        for (i, e) in self.effects.iter().enumerate() {
            if e.signal.is_some_and(|s| s as usize >= n_signals) {
                violations.push(format!("effect {i} references missing signal"));
            }
        }
        for (i, r) in self.rule_sets.iter().enumerate() {
            if r.domain.is_some_and(|d| d as usize >= n_domains) {
                violations.push(format!("rule set {i} references missing domain"));
            }
        }
        for (i, r) in self.rules.iter().enumerate() {
            if r.rule_set as usize >= self.rule_sets.len() {
                violations.push(format!("rule {i} references missing rule set"));
            }
            if r.metric as usize >= self.metrics.len() {
                violations.push(format!("rule {i} references missing metric"));
            }
            if r.curve as usize >= self.curves.len() {
                violations.push(format!("rule {i} references missing curve"));
            }
            if r.effect_len == 0 || r.effect_range().end > self.rule_effects.len() {
                violations.push(format!("rule {i} has an invalid effect range"));
            }
            if r.context_filter.as_deref() == Some("") {
                violations.push(format!("rule {i} has an empty context filter"));
            }
            if i > 0 {
                let prev = &self.rules[i - 1];
                if (prev.metric, prev.declaration_order) >= (r.metric, r.declaration_order) {
                    violations.push(format!("rule {i} out of (metric, declaration) order"));
                }
            }
        }
        for (i, re) in self.rule_effects.iter().enumerate() {
            if re.effect as usize >= self.effects.len() {
                violations.push(format!("rule effect {i} references missing effect"));
            }
        }
        for (i, rs) in self.domain_rule_sets.iter().enumerate() {
            if *rs as usize >= self.rule_sets.len() {
                violations.push(format!("domain entry {i} references missing rule set"));
            }
        }
        for (i, c) in self.curves.iter().enumerate() {
            if c.len() != self.curve_samples as usize {
                violations.push(format!("curve {i} has {} samples", c.len()));
            }
        }

        check_groups(
            "rule group",
            self.rule_groups.iter().map(|g| (g.metric, g.start, g.len)),
            self.rules.iter().map(|r| r.metric),
            &mut violations,
        );
        check_groups(
            "metric group",
            self.metric_groups.iter().map(|g| (g.signal, g.start, g.len)),
            self.metrics.iter().map(|m| m.signal),
            &mut violations,
        );

        let mut cursor = 0;
        for (i, d) in self.domains.iter().enumerate() {
            if d.start as usize != cursor {
                violations.push(format!("domain {i} range is not contiguous"));
            }
            cursor = d.start as usize + d.len as usize;
        }
        if cursor != self.domain_rule_sets.len() {
            violations.push("domain ranges do not cover the rule set list".to_string());
        }

        violations
    }
}

/// Groups must be ascending by key, contiguous from 0, cover every item, and
/// contain only items with their key.
fn check_groups(
    label: &str,
    groups: impl Iterator<Item = (LibIndex, LibIndex, LibIndex)>,
    keys: impl Iterator<Item = LibIndex>,
    violations: &mut Vec<String>,
) {
    let keys: Vec<LibIndex> = keys.collect();
    let mut cursor = 0usize;
    let mut last_key: Option<LibIndex> = None;
    for (i, (key, start, len)) in groups.enumerate() {
        if last_key.is_some_and(|k| k >= key) {
            violations.push(format!("{label} {i} key not ascending"));
        }
        last_key = Some(key);
        if start as usize != cursor || len == 0 {
            violations.push(format!("{label} {i} range is not contiguous"));
        }
        let range = span(start, len);
        if range.end > keys.len() || keys[range.clone()].iter().any(|k| *k != key) {
            violations.push(format!("{label} {i} contains foreign items"));
        }
        cursor = range.end;
    }
    if cursor != keys.len() {
        violations.push(format!("{label}s do not cover all items"));
    }
}
