//! Signal definitions: named observable sources in the simulated world.

use serde::{Deserialize, Serialize};

use crate::types::LodTier;

/// An authored signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Unique, case-sensitive key.
    pub id: String,
    /// Owning domain id. Empty when the signal is domain-less.
    #[serde(default)]
    pub domain_id: String,
    /// Coarsest society LOD tier at which this signal is still observed.
    #[serde(default = "default_minimum_lod")]
    pub minimum_lod: LodTier,
    /// Value used when the signal is raised without an explicit value.
    #[serde(default = "default_weight")]
    pub default_weight: f32,
}

impl SignalDefinition {
    /// Create a signal observed at every LOD tier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain_id: String::new(),
            minimum_lod: default_minimum_lod(),
            default_weight: default_weight(),
        }
    }

    /// Attach the signal to a domain.
    #[must_use]
    pub fn in_domain(mut self, domain_id: impl Into<String>) -> Self {
        self.domain_id = domain_id.into();
        self
    }

    /// Suppress the signal in societies coarser than `lod`.
    #[must_use]
    pub fn with_minimum_lod(mut self, lod: LodTier) -> Self {
        self.minimum_lod = lod;
        self
    }
}

fn default_minimum_lod() -> LodTier {
    LodTier::Aggregated
}

fn default_weight() -> f32 {
    1.0
}
