//! Domains and society profiles: coarse grouping and per-society selection.

use serde::{Deserialize, Serialize};

use crate::types::LodTier;

/// A named grouping of rule sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDefinition {
    /// Unique, case-sensitive key.
    pub id: String,
    /// Member rule set ids; duplicates are ignored at compile time.
    #[serde(default)]
    pub rule_set_ids: Vec<String>,
}

impl DomainDefinition {
    /// Create a domain over `rule_set_ids`.
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, rule_set_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            rule_set_ids: rule_set_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Per-society selection of the library plus tick-rate tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocietyProfileDefinition {
    /// Unique, case-sensitive key.
    pub id: String,
    /// Simulation detail for societies using this profile.
    #[serde(default)]
    pub lod: LodTier,
    /// Multiplier on every metric's sample interval.
    #[serde(default = "default_scale")]
    pub sample_interval_scale: f32,
    /// Directly enabled domains.
    #[serde(default)]
    pub domain_ids: Vec<String>,
    /// Directly enabled rule sets.
    #[serde(default)]
    pub rule_set_ids: Vec<String>,
    /// Directly enabled metrics, in addition to those reached through rules.
    #[serde(default)]
    pub metric_ids: Vec<String>,
}

impl SocietyProfileDefinition {
    /// An empty selection at full detail.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lod: LodTier::Full,
            sample_interval_scale: default_scale(),
            domain_ids: Vec::new(),
            rule_set_ids: Vec::new(),
            metric_ids: Vec::new(),
        }
    }

    /// Enable a domain.
    #[must_use]
    pub fn with_domain(mut self, domain_id: impl Into<String>) -> Self {
        self.domain_ids.push(domain_id.into());
        self
    }

    /// Enable a rule set.
    #[must_use]
    pub fn with_rule_set(mut self, rule_set_id: impl Into<String>) -> Self {
        self.rule_set_ids.push(rule_set_id.into());
        self
    }

    /// Enable a metric.
    #[must_use]
    pub fn with_metric(mut self, metric_id: impl Into<String>) -> Self {
        self.metric_ids.push(metric_id.into());
        self
    }

    /// Set the LOD tier.
    #[must_use]
    pub fn at_lod(mut self, lod: LodTier) -> Self {
        self.lod = lod;
        self
    }

    /// Stretch (or shrink) every metric interval by `scale`.
    #[must_use]
    pub fn with_interval_scale(mut self, scale: f32) -> Self {
        self.sample_interval_scale = scale;
        self
    }
}

fn default_scale() -> f32 {
    1.0
}
