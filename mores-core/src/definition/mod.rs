//! Authored definition records and the [`DefinitionSet`] working set.
//!
//! Definitions are pure data. They reference each other by string id; the
//! [`LibraryCompiler`](crate::LibraryCompiler) resolves those ids to indices
//! and drops whatever does not resolve.

pub mod effect;
pub mod metric;
pub mod rule;
pub mod signal;
pub mod society;

pub use effect::{EffectDefinition, EffectTargetKind, EffectType};
pub use metric::{Aggregation, MetricDefinition, MetricScope, Normalization, SamplingMode};
pub use rule::{RuleDefinition, RuleEffectDefinition, RuleSetDefinition};
pub use signal::SignalDefinition;
pub use society::{DomainDefinition, SocietyProfileDefinition};

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MoresError, Result};

/// Every definition handed to one compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSet {
    /// Signals.
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
    /// Metrics.
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
    /// Effects.
    #[serde(default)]
    pub effects: Vec<EffectDefinition>,
    /// Rule sets with their rules.
    #[serde(default)]
    pub rule_sets: Vec<RuleSetDefinition>,
    /// Domains.
    #[serde(default)]
    pub domains: Vec<DomainDefinition>,
    /// Society profiles; compiled separately into masks.
    #[serde(default)]
    pub profiles: Vec<SocietyProfileDefinition>,
}

impl DefinitionSet {
    /// Create an empty working set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a working set from TOML.
    ///
    /// # Errors
    /// Returns `MoresError::Definition` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| MoresError::Definition {
            source_name: "<toml>".to_string(),
            message: e.to_string(),
        })
    }

    /// Parse a working set from JSON.
    ///
    /// # Errors
    /// Returns `MoresError::Definition` if the JSON is invalid.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| MoresError::Definition {
            source_name: "<json>".to_string(),
            message: e.to_string(),
        })
    }

    /// Load a working set from a `.toml` or `.json` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, has an unsupported
    /// extension, or fails to parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let source_name = path.display().to_string();
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => {
                return Err(MoresError::Definition {
                    source_name,
                    message: "expected a .toml or .json file".to_string(),
                });
            }
        };
        let set = parsed.map_err(|e| match e {
            MoresError::Definition { message, .. } => MoresError::Definition {
                source_name: source_name.clone(),
                message,
            },
            other => other,
        })?;
        info!(
            path = %source_name,
            signals = set.signals.len(),
            metrics = set.metrics.len(),
            effects = set.effects.len(),
            rule_sets = set.rule_sets.len(),
            "Loaded definitions"
        );
        Ok(set)
    }

    /// Append `other` after this set's records, preserving order.
    ///
    /// Duplicate ids are kept here; the compiler resolves them first-wins.
    pub fn merge(&mut self, other: DefinitionSet) {
        self.signals.extend(other.signals);
        self.metrics.extend(other.metrics);
        self.effects.extend(other.effects);
        self.rule_sets.extend(other.rule_sets);
        self.domains.extend(other.domains);
        self.profiles.extend(other.profiles);
    }

    /// Total number of authored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
            + self.metrics.len()
            + self.effects.len()
            + self.rule_sets.len()
            + self.domains.len()
            + self.profiles.len()
    }

    /// Whether nothing has been authored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
