//! Rule evaluator: sampled metric in, effect commands out.
//!
//! For one `(metric, normalized value)` pair every rule in the metric's group
//! is visited in compiled order. A rule passes through these gates:
//!
//! 1. profile mask and authored `enabled` flag
//! 2. context filter
//! 3. cooldown
//! 4. probability roll: `curve(x) * weight`, one draw from the entity seed
//!
//! A rule that fires sets its cooldown and emits one [`EffectCommand`] per
//! listed effect. There is no early exit; later rules are evaluated whether
//! or not earlier ones fired.

use std::ops::AddAssign;

use rand::distributions::{Distribution, Standard};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::EvaluatorConfig;
use crate::context::SimulationContext;
use crate::definition::EffectTargetKind;
use crate::effects::EffectCommand;
use crate::sampler::MetricSample;
use crate::types::{clamp01, EntityId, LibIndex, SimTime};

// ---------------------------------------------------------------------------
// RandomSeed
// ---------------------------------------------------------------------------

/// Per-entity xorshift32 state, advanced in place by every probability roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RandomSeed(u32);

impl RandomSeed {
    /// Replacement for a zero seed, which xorshift cannot leave.
    pub const FALLBACK: u32 = 0x9E37_79B9;

    /// Seed from `value`; zero is replaced with [`RandomSeed::FALLBACK`].
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(if value == 0 { Self::FALLBACK } else { value })
    }

    /// Current state.
    #[must_use]
    pub fn state(self) -> u32 {
        self.0
    }

    /// Advance and return the new state.
    pub fn advance(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// Uniform draw in `[0, 1)`.
    pub fn draw(&mut self) -> f32 {
        Standard.sample(self)
    }
}

impl Default for RandomSeed {
    fn default() -> Self {
        Self::new(Self::FALLBACK)
    }
}

impl RngCore for RandomSeed {
    fn next_u32(&mut self) -> u32 {
        self.advance()
    }

    fn next_u64(&mut self) -> u64 {
        let hi = u64::from(self.advance());
        let lo = u64::from(self.advance());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.advance().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

/// Earliest time a rule may fire again for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleCooldown {
    /// Rule index.
    pub rule: LibIndex,
    /// Simulated time before which the rule is gated.
    pub next_allowed_time: SimTime,
}

/// Sparse per-entity cooldown table, sorted by rule index.
///
/// Entries are created on first lookup, so an entity only pays for rules it
/// has actually evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCooldowns {
    entries: Vec<RuleCooldown>,
}

impl RuleCooldowns {
    /// Entry for `rule`, created ungated if absent.
    pub fn entry(&mut self, rule: LibIndex) -> &mut RuleCooldown {
        let pos = match self.entries.binary_search_by_key(&rule, |c| c.rule) {
            Ok(pos) => pos,
            Err(pos) => {
                self.entries.insert(
                    pos,
                    RuleCooldown {
                        rule,
                        next_allowed_time: SimTime::NEG_INFINITY,
                    },
                );
                pos
            }
        };
        &mut self.entries[pos]
    }

    /// Read-only lookup.
    #[must_use]
    pub fn get(&self, rule: LibIndex) -> Option<&RuleCooldown> {
        self.entries
            .binary_search_by_key(&rule, |c| c.rule)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Whether `rule` may fire at `now`.
    #[must_use]
    pub fn is_ready(&self, rule: LibIndex, now: SimTime) -> bool {
        self.get(rule).is_none_or(|c| now >= c.next_allowed_time)
    }

    /// Number of entries created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// One sampled metric to evaluate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationRequest<'a> {
    /// Metric index.
    pub metric: LibIndex,
    /// Normalized sample in `[0, 1]`.
    pub normalized: f32,
    /// Entity that owns the metric.
    pub subject: EntityId,
    /// Society root of `subject`.
    pub society_root: EntityId,
    /// Caller-supplied target for `EventTarget` effects.
    pub event_target: Option<EntityId>,
    /// Original signal target for `SignalTarget` effects.
    pub signal_target: Option<EntityId>,
    /// Context id the rules' filters are compared with.
    pub context_id: Option<&'a str>,
}

impl<'a> EvaluationRequest<'a> {
    /// A request with no targets and no context.
    #[must_use]
    pub fn new(metric: LibIndex, normalized: f32, subject: EntityId, society_root: EntityId) -> Self {
        Self {
            metric,
            normalized,
            subject,
            society_root,
            event_target: None,
            signal_target: None,
            context_id: None,
        }
    }

    /// Build from a flushed sample; the sample's observation target serves
    /// as both event and signal target.
    #[must_use]
    pub fn from_sample(sample: &'a MetricSample) -> Self {
        Self {
            metric: sample.metric,
            normalized: sample.normalized,
            subject: sample.subject,
            society_root: sample.society_root,
            event_target: sample.target,
            signal_target: sample.target,
            context_id: sample.context.as_deref(),
        }
    }

    /// Set the context id.
    #[must_use]
    pub fn in_context(mut self, context_id: &'a str) -> Self {
        self.context_id = Some(context_id);
        self
    }

    /// Set the event target.
    #[must_use]
    pub fn with_target(mut self, target: EntityId) -> Self {
        self.event_target = Some(target);
        self
    }

    /// Concrete entity an effect with `kind` lands on.
    #[must_use]
    pub fn resolve_target(&self, kind: EffectTargetKind) -> EntityId {
        match kind {
            EffectTargetKind::EventTarget => self.event_target.unwrap_or(self.subject),
            EffectTargetKind::SocietyRoot => self.society_root,
            EffectTargetKind::SignalTarget => self.signal_target.unwrap_or(self.subject),
        }
    }
}

/// Gate counts from one or more evaluations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Samples evaluated.
    pub samples: u64,
    /// Rules visited.
    pub candidates: u64,
    /// Skipped by the profile mask.
    pub masked: u64,
    /// Skipped because their rule set is authored disabled.
    pub disabled: u64,
    /// Skipped by the context filter.
    pub filtered: u64,
    /// Skipped by cooldown.
    pub cooling: u64,
    /// Probability rolls made.
    pub rolled: u64,
    /// Rules fired.
    pub fired: u64,
    /// Effect commands produced.
    pub commands: u64,
}

impl AddAssign for EvaluationReport {
    fn add_assign(&mut self, rhs: Self) {
        self.samples += rhs.samples;
        self.candidates += rhs.candidates;
        self.masked += rhs.masked;
        self.disabled += rhs.disabled;
        self.filtered += rhs.filtered;
        self.cooling += rhs.cooling;
        self.rolled += rhs.rolled;
        self.fired += rhs.fired;
        self.commands += rhs.commands;
    }
}

// ---------------------------------------------------------------------------
// RuleEvaluator
// ---------------------------------------------------------------------------

/// Evaluates rules for sampled metrics.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator {
    config: EvaluatorConfig,
}

impl RuleEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Effective firing probability of a rule with `curve_value` and `weight`.
    #[must_use]
    pub fn effective_probability(&self, curve_value: f32, weight: f32) -> f32 {
        let p = curve_value * weight;
        if self.config.clamp_probability { clamp01(p) } else { p }
    }

    /// Evaluate every rule of `request.metric`, appending effect commands to
    /// `out`.
    ///
    /// `cooldowns` and `seed` belong to the subject entity. The seed advances
    /// once per probability roll and never for gated rules.
    pub fn evaluate(
        &self,
        ctx: &SimulationContext<'_>,
        request: &EvaluationRequest<'_>,
        cooldowns: &mut RuleCooldowns,
        seed: &mut RandomSeed,
        out: &mut Vec<EffectCommand>,
    ) -> EvaluationReport {
        let library = ctx.library;
        let context_id = request.context_id.filter(|c| !c.is_empty());
        let mut report = EvaluationReport {
            samples: 1,
            ..EvaluationReport::default()
        };

        for rule_idx in library.rule_range(request.metric) {
            let rule = &library.rules[rule_idx];
            let rule_id = rule_idx as LibIndex;
            report.candidates += 1;

            if !ctx.rule_set_enabled(rule.rule_set) {
                report.masked += 1;
                continue;
            }
            if !ctx.rule_set_authored_enabled(rule) {
                report.disabled += 1;
                continue;
            }
            if let Some(filter) = rule.context_filter.as_deref() {
                if context_id != Some(filter) {
                    report.filtered += 1;
                    continue;
                }
            }
            let cooldown = cooldowns.entry(rule_id);
            if ctx.now < cooldown.next_allowed_time {
                report.cooling += 1;
                continue;
            }

            let p = self.effective_probability(
                library.curve_probability(rule, request.normalized),
                rule.weight,
            );
            let draw = seed.draw();
            report.rolled += 1;
            if p <= 0.0 || draw > p {
                trace!(rule = rule_id, p, draw, "Rule roll failed");
                continue;
            }

            cooldown.next_allowed_time = ctx.now + f64::from(rule.cooldown_seconds);
            report.fired += 1;
            trace!(rule = rule_id, p, draw, subject = %request.subject, "Rule fired");

            for re in library.rule_effects(rule) {
                let Some(effect) = library.effects.get(re.effect as usize) else {
                    continue;
                };
                out.push(EffectCommand {
                    effect: re.effect,
                    rule: rule_id,
                    weight: re.weight,
                    normalized: request.normalized,
                    subject: request.subject,
                    target: request.resolve_target(effect.target),
                    society_root: request.society_root,
                    context: context_id.map(str::to_string),
                    time: ctx.now,
                });
                report.commands += 1;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::ProbabilityCurve;
    use crate::definition::{
        DefinitionSet, EffectDefinition, EffectType, MetricDefinition, RuleDefinition,
        RuleSetDefinition, SignalDefinition,
    };
    use crate::library::compiler::compile;
    use crate::library::RuntimeLibrary;

    fn library(rule: RuleDefinition) -> RuntimeLibrary {
        let mut set = DefinitionSet::new();
        set.signals.push(SignalDefinition::new("s"));
        set.metrics.push(MetricDefinition::new("m", "s"));
        set.effects.push(EffectDefinition::new("e1", EffectType::ModifyNeed, "calm", 1.0));
        set.effects.push(
            EffectDefinition::new("e2", EffectType::ModifyNeed, "calm", 1.0)
                .targeting(EffectTargetKind::SocietyRoot),
        );
        set.rule_sets.push(RuleSetDefinition::new("rs").with_rule(rule));
        compile(&set)
    }

    fn always() -> RuleDefinition {
        RuleDefinition::new("m").with_effect("e1").with_effect("e2")
    }

    fn request() -> EvaluationRequest<'static> {
        EvaluationRequest::new(0, 0.5, EntityId(1), EntityId(100))
    }

    #[test]
    fn zero_seed_replaced() {
        assert_eq!(RandomSeed::new(0).state(), RandomSeed::FALLBACK);
        let mut a = RandomSeed::new(7);
        let mut b = RandomSeed::new(7);
        for _ in 0..10 {
            assert_eq!(a.advance(), b.advance());
        }
        assert_ne!(a.state(), 0);
    }

    #[test]
    fn draws_in_unit_interval() {
        let mut seed = RandomSeed::new(12345);
        for _ in 0..1000 {
            let d = seed.draw();
            assert!((0.0..1.0).contains(&d));
        }
    }

    #[test]
    fn certain_rule_fans_out_all_effects() {
        let lib = library(always());
        let ctx = SimulationContext::new(&lib, 10.0);
        let mut cds = RuleCooldowns::default();
        let mut seed = RandomSeed::new(1);
        let mut out = Vec::new();
        let report = RuleEvaluator::default().evaluate(&ctx, &request(), &mut cds, &mut seed, &mut out);
        assert_eq!(report.fired, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].target, EntityId(1));
        assert_eq!(out[1].target, EntityId(100));
    }

    #[test]
    fn cooldown_blocks_without_consuming_seed() {
        let lib = library(always().with_cooldown(5.0));
        let eval = RuleEvaluator::default();
        let mut cds = RuleCooldowns::default();
        let mut seed = RandomSeed::new(99);
        let mut out = Vec::new();

        let ctx = SimulationContext::new(&lib, 0.0);
        assert_eq!(eval.evaluate(&ctx, &request(), &mut cds, &mut seed, &mut out).fired, 1);
        let after_fire = seed;

        let report = eval.evaluate(&ctx.at(4.9), &request(), &mut cds, &mut seed, &mut out);
        assert_eq!(report.cooling, 1);
        assert_eq!(seed, after_fire);

        assert_eq!(eval.evaluate(&ctx.at(5.0), &request(), &mut cds, &mut seed, &mut out).fired, 1);
    }

    #[test]
    fn zero_probability_rolls_but_never_fires() {
        let lib = library(always().with_curve(ProbabilityCurve::constant(0.0)));
        let ctx = SimulationContext::new(&lib, 0.0);
        let mut cds = RuleCooldowns::default();
        let mut seed = RandomSeed::new(3);
        let mut out = Vec::new();
        let report = RuleEvaluator::default().evaluate(&ctx, &request(), &mut cds, &mut seed, &mut out);
        assert_eq!(report.rolled, 1);
        assert_eq!(report.fired, 0);
        assert!(out.is_empty());
        assert_ne!(seed, RandomSeed::new(3));
    }

    #[test]
    fn context_filter_requires_match() {
        let lib = library(always().in_context("tavern"));
        let ctx = SimulationContext::new(&lib, 0.0);
        let eval = RuleEvaluator::default();
        let mut cds = RuleCooldowns::default();
        let mut seed = RandomSeed::new(3);
        let mut out = Vec::new();

        let r = eval.evaluate(&ctx, &request().in_context("market"), &mut cds, &mut seed, &mut out);
        assert_eq!(r.filtered, 1);
        let r = eval.evaluate(&ctx, &request(), &mut cds, &mut seed, &mut out);
        assert_eq!(r.filtered, 1);
        let r = eval.evaluate(&ctx, &request().in_context("tavern"), &mut cds, &mut seed, &mut out);
        assert_eq!(r.fired, 1);
        assert_eq!(out[0].context.as_deref(), Some("tavern"));
    }

    #[test]
    fn disabled_rule_set_skipped() {
        let mut set = DefinitionSet::new();
        set.signals.push(SignalDefinition::new("s"));
        set.metrics.push(MetricDefinition::new("m", "s"));
        set.effects.push(EffectDefinition::new("e1", EffectType::ModifyNeed, "calm", 1.0));
        let mut rs = RuleSetDefinition::new("rs").with_rule(RuleDefinition::new("m").with_effect("e1"));
        rs.enabled = false;
        set.rule_sets.push(rs);
        let lib = compile(&set);
        let ctx = SimulationContext::new(&lib, 0.0);
        let mut seed = RandomSeed::new(3);
        let r = RuleEvaluator::default().evaluate(
            &ctx,
            &request(),
            &mut RuleCooldowns::default(),
            &mut seed,
            &mut Vec::new(),
        );
        assert_eq!(r.disabled, 1);
        assert_eq!(seed, RandomSeed::new(3));
    }

    #[test]
    fn cooldown_table_stays_sorted() {
        let mut cds = RuleCooldowns::default();
        cds.entry(5).next_allowed_time = 1.0;
        cds.entry(2);
        cds.entry(9);
        cds.entry(5);
        assert_eq!(cds.len(), 3);
        assert!(!cds.is_ready(5, 0.5));
        assert!(cds.is_ready(2, 0.0));
        assert!(cds.is_ready(77, 0.0));
    }

    #[test]
    fn unclamped_probability_passes_through() {
        let eval = RuleEvaluator::new(EvaluatorConfig {
            clamp_probability: false,
            ..EvaluatorConfig::default()
        });
        assert!((eval.effective_probability(1.0, 2.0) - 2.0).abs() < f32::EPSILON);
        assert!((RuleEvaluator::default().effective_probability(1.0, 2.0) - 1.0).abs() < f32::EPSILON);
    }
}
