//! Rule sets, rules and rule effects.

use serde::{Deserialize, Serialize};

use crate::curve::ProbabilityCurve;

/// One effect reference inside a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEffectDefinition {
    /// Effect id to resolve.
    pub effect_id: String,
    /// Carried through to the compiled library for downstream intensity
    /// scaling. Not a selection gate: every listed effect fires.
    #[serde(default = "default_weight")]
    pub weight: f32,
}

impl RuleEffectDefinition {
    /// Reference `effect_id` with weight 1.
    #[must_use]
    pub fn new(effect_id: impl Into<String>) -> Self {
        Self {
            effect_id: effect_id.into(),
            weight: default_weight(),
        }
    }
}

/// A probability- and cooldown-gated trigger on one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Metric whose samples are evaluated by this rule.
    pub metric_id: String,
    /// When non-empty, the rule only fires for this context id.
    #[serde(default)]
    pub context_id_filter: Option<String>,
    /// Firing probability as a function of the normalized sample.
    #[serde(default)]
    pub probability_curve: ProbabilityCurve,
    /// Multiplier on the curve value.
    #[serde(default = "default_weight")]
    pub weight: f32,
    /// Minimum seconds between firings for the same entity.
    #[serde(default)]
    pub cooldown_seconds: f32,
    /// Effects applied, in order, when the rule fires.
    #[serde(default)]
    pub effects: Vec<RuleEffectDefinition>,
}

impl RuleDefinition {
    /// A rule on `metric_id` that always fires (curve 1, weight 1, no cooldown).
    #[must_use]
    pub fn new(metric_id: impl Into<String>) -> Self {
        Self {
            metric_id: metric_id.into(),
            context_id_filter: None,
            probability_curve: ProbabilityCurve::constant(1.0),
            weight: default_weight(),
            cooldown_seconds: 0.0,
            effects: Vec::new(),
        }
    }

    /// Set the probability curve.
    #[must_use]
    pub fn with_curve(mut self, curve: ProbabilityCurve) -> Self {
        self.probability_curve = curve;
        self
    }

    /// Set the rule weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, seconds: f32) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// Restrict the rule to one context id.
    #[must_use]
    pub fn in_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id_filter = Some(context_id.into());
        self
    }

    /// Append an effect reference with weight 1.
    #[must_use]
    pub fn with_effect(mut self, effect_id: impl Into<String>) -> Self {
        self.effects.push(RuleEffectDefinition::new(effect_id));
        self
    }
}

/// An authored group of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDefinition {
    /// Unique, case-sensitive key.
    pub id: String,
    /// Owning domain id. Empty when the rule set is domain-less.
    #[serde(default)]
    pub domain_id: String,
    /// Authoring kill switch; disabled sets compile but never fire.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Rules in declaration (priority) order.
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl RuleSetDefinition {
    /// Create an enabled, empty rule set.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain_id: String::new(),
            enabled: true,
            rules: Vec::new(),
        }
    }

    /// Attach the rule set to a domain.
    #[must_use]
    pub fn in_domain(mut self, domain_id: impl Into<String>) -> Self {
        self.domain_id = domain_id.into();
        self
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }
}

fn default_weight() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}
