//! Configuration for the mores engine.
//!
//! Maps directly to `mores.toml`. Every field has a default, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::curve::DEFAULT_CURVE_SAMPLES;

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoresConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Library compilation.
    #[serde(default)]
    pub compiler: CompilerConfig,
    /// Metric sampling.
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Rule evaluation.
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    /// Host tick loop.
    #[serde(default)]
    pub world: WorldConfig,
    /// Telemetry & observability.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl MoresConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MoresError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::MoresError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether rule evaluation runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Library compiler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Samples per baked probability curve (floored to 4).
    #[serde(default = "default_curve_samples")]
    pub curve_samples: usize,
    /// Smallest metric sample interval in seconds.
    #[serde(default = "default_min_interval")]
    pub min_sample_interval: f32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            curve_samples: DEFAULT_CURVE_SAMPLES,
            min_sample_interval: default_min_interval(),
        }
    }
}

/// Metric sampler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Smallest interval the timer will advance by, in seconds.
    #[serde(default = "default_min_interval")]
    pub min_sample_interval: f32,
    /// Spread each entity's first flush across one interval.
    #[serde(default = "default_true")]
    pub stagger_first_sample: bool,
    /// Per-entity cap on queued event-mode samples; extra events are dropped.
    #[serde(default = "default_max_pending")]
    pub max_pending_events: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_sample_interval: default_min_interval(),
            stagger_first_sample: true,
            max_pending_events: default_max_pending(),
        }
    }
}

/// Rule evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Clamp `curve * weight` to `[0, 1]` before rolling.
    #[serde(default = "default_true")]
    pub clamp_probability: bool,
    /// Seed used for entities spawned without one.
    #[serde(default = "default_seed")]
    pub default_seed: u32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            clamp_probability: true,
            default_seed: default_seed(),
        }
    }
}

/// Host tick loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Evaluate entities on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Signals drained from the queue per tick; the rest wait.
    #[serde(default = "default_max_signals")]
    pub max_signals_per_tick: usize,
    /// Keep flushed samples in memory for inspection.
    #[serde(default)]
    pub retain_samples: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_signals_per_tick: default_max_signals(),
            retain_samples: false,
        }
    }
}

/// Telemetry and observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Collect counters.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tick budget in milliseconds.
    #[serde(default = "default_tick_budget")]
    pub tick_budget_ms: f64,
    /// Log any tick exceeding its budget.
    #[serde(default = "default_true")]
    pub log_slow_ticks: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_budget_ms: default_tick_budget(),
            log_slow_ticks: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_curve_samples() -> usize { DEFAULT_CURVE_SAMPLES }
fn default_min_interval() -> f32 { 0.01 }
fn default_max_pending() -> usize { 64 }
fn default_seed() -> u32 { 0x9E37_79B9 }
fn default_max_signals() -> usize { 4096 }
fn default_tick_budget() -> f64 { 2.0 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let cfg = MoresConfig::from_toml("").expect("empty config");
        assert_eq!(cfg.compiler.curve_samples, 32);
        assert!(cfg.evaluator.clamp_probability);
        assert!(cfg.world.parallel);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let cfg = MoresConfig::from_toml(
            "[compiler]\ncurve_samples = 64\n\n[world]\nparallel = false\n",
        )
        .expect("valid config");
        assert_eq!(cfg.compiler.curve_samples, 64);
        assert!((cfg.compiler.min_sample_interval - 0.01).abs() < f32::EPSILON);
        assert!(!cfg.world.parallel);
        assert_eq!(cfg.world.max_signals_per_tick, 4096);
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = MoresConfig::from_toml("[compiler]\ncurve_samples = \"many\"").expect_err("should fail");
        assert!(matches!(err, crate::MoresError::Config(_)));
    }
}
