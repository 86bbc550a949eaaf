//! Metric definitions: periodic aggregation of a signal's observations.

use serde::{Deserialize, Serialize};

/// How observations reach the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Accumulate and flush on the metric's interval.
    #[default]
    Aggregate,
    /// Every observation becomes its own sample on the next tick.
    Event,
}

/// Which entity owns the metric's runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricScope {
    /// Tracked once per society, on the society root.
    Society,
    /// Tracked per society member.
    #[default]
    Member,
}

/// Reduction applied to one sampling period's observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Aggregation {
    /// The most recent observation.
    NoAggregation,
    /// Arithmetic mean; 0 without observations.
    #[default]
    Average,
    /// Sum of observations.
    Sum,
    /// Smallest observation; 0 without observations.
    Min,
    /// Largest observation; 0 without observations.
    Max,
    /// Number of observations.
    Count,
    /// Observations per second of interval.
    Rate,
}

/// Mapping of the aggregated value onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Normalization {
    /// Clamp to `[0, 1]`.
    #[default]
    Clamp01,
    /// `1 - clamp01(v)`.
    Invert01,
    /// Map `[-1, 1]` onto `[0, 1]`.
    Signed01,
    /// `clamp01(|v|)`.
    Abs01,
}

/// An authored metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Unique, case-sensitive key.
    pub id: String,
    /// Signal whose observations feed this metric.
    pub signal_id: String,
    /// Seconds between flushes. Floored to the sampler's minimum interval.
    #[serde(default = "default_interval")]
    pub sample_interval: f32,
    /// Aggregate or per-event sampling.
    #[serde(default)]
    pub sampling_mode: SamplingMode,
    /// Society-level or member-level tracking.
    #[serde(default)]
    pub scope: MetricScope,
    /// Period reduction.
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Output mapping.
    #[serde(default)]
    pub normalization: Normalization,
}

impl MetricDefinition {
    /// Create an averaged, clamped, member-scoped metric over `signal_id`.
    #[must_use]
    pub fn new(id: impl Into<String>, signal_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            signal_id: signal_id.into(),
            sample_interval: default_interval(),
            sampling_mode: SamplingMode::default(),
            scope: MetricScope::default(),
            aggregation: Aggregation::default(),
            normalization: Normalization::default(),
        }
    }

    /// Set the flush interval in seconds.
    #[must_use]
    pub fn every(mut self, seconds: f32) -> Self {
        self.sample_interval = seconds;
        self
    }

    /// Set the aggregation mode.
    #[must_use]
    pub fn aggregated(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Set the normalization mode.
    #[must_use]
    pub fn normalized(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Set the scope.
    #[must_use]
    pub fn scoped(mut self, scope: MetricScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the sampling mode.
    #[must_use]
    pub fn sampled(mut self, mode: SamplingMode) -> Self {
        self.sampling_mode = mode;
        self
    }
}

fn default_interval() -> f32 {
    1.0
}
