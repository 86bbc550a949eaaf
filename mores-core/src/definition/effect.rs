//! Effect definitions: atomic state mutations or messages fired by rules.

use serde::{Deserialize, Serialize};

/// What an effect does when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectType {
    /// Adjust a need value keyed by `parameter_id`.
    ModifyNeed,
    /// Adjust a resource amount keyed by `parameter_id`.
    ModifyResource,
    /// Adjust a reputation standing keyed by `parameter_id`.
    ModifyReputation,
    /// Adjust the target's cohesion scalar.
    ModifyCohesion,
    /// Ask the schedule system to switch the target to `parameter_id`.
    OverrideSchedule,
    /// Adjust the subject's affinity toward the target.
    ModifyRelationship,
    /// Insert or strengthen an intent on the target.
    AddIntent,
    /// Raise the signal named by `parameter_id`.
    EmitSignal,
    /// Adjust the target's health, scaled by its max health.
    ModifyHealth,
}

/// Which entity an effect lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EffectTargetKind {
    /// The caller-supplied target, or the subject when there is none.
    #[default]
    EventTarget,
    /// The society root of the subject.
    SocietyRoot,
    /// The original target of the signal event that fed the metric.
    SignalTarget,
}

/// An authored effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDefinition {
    /// Unique, case-sensitive key.
    pub id: String,
    /// Effect kind.
    pub effect_type: EffectType,
    /// Target selection.
    #[serde(default)]
    pub target: EffectTargetKind,
    /// Primary key: need, resource, reputation, activity, intent or signal id.
    #[serde(default)]
    pub parameter_id: String,
    /// Secondary key; the need id of an `AddIntent` key.
    #[serde(default)]
    pub secondary_id: String,
    /// Tertiary key; the resource id of an `AddIntent` key.
    #[serde(default)]
    pub tertiary_id: String,
    /// Scale applied to the sampled, normalized value.
    #[serde(default)]
    pub magnitude: f32,
    /// Whether `[min_value, max_value]` bounds the written value.
    #[serde(default)]
    pub use_clamp: bool,
    /// Lower bound when `use_clamp` is set.
    #[serde(default)]
    pub min_value: f32,
    /// Upper bound when `use_clamp` is set.
    #[serde(default = "default_max")]
    pub max_value: f32,
}

impl EffectDefinition {
    /// Create an unclamped effect.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        effect_type: EffectType,
        parameter_id: impl Into<String>,
        magnitude: f32,
    ) -> Self {
        Self {
            id: id.into(),
            effect_type,
            target: EffectTargetKind::default(),
            parameter_id: parameter_id.into(),
            secondary_id: String::new(),
            tertiary_id: String::new(),
            magnitude,
            use_clamp: false,
            min_value: 0.0,
            max_value: default_max(),
        }
    }

    /// Select the target.
    #[must_use]
    pub fn targeting(mut self, target: EffectTargetKind) -> Self {
        self.target = target;
        self
    }

    /// Bound the written value to `[min, max]`.
    #[must_use]
    pub fn clamped(mut self, min: f32, max: f32) -> Self {
        self.use_clamp = true;
        self.min_value = min;
        self.max_value = max;
        self
    }

    /// Set the secondary key.
    #[must_use]
    pub fn with_secondary(mut self, secondary_id: impl Into<String>) -> Self {
        self.secondary_id = secondary_id.into();
        self
    }

    /// Set the tertiary key.
    #[must_use]
    pub fn with_tertiary(mut self, tertiary_id: impl Into<String>) -> Self {
        self.tertiary_id = tertiary_id.into();
        self
    }
}

fn default_max() -> f32 {
    1.0
}
