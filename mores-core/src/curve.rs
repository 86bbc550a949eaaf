//! Probability curves: authored keyframes and their baked lookup tables.
//!
//! Rules author their firing probability as a function of the sampled,
//! normalized metric value. At compile time each curve is sampled into a
//! fixed-length table so the per-tick lookup is a single interpolation:
//!
//! ```text
//!   keys:   (0.0, 0.0) (0.5, 1.0) (1.0, 0.0)
//!   baked:  [0.0, 0.5, 1.0, 0.5, 0.0]          (5 samples)
//!   sample: x = 0.25 -> table[1] = 0.5
//! ```

use serde::{Deserialize, Serialize};

use crate::types::clamp01;

/// Samples per baked curve unless the compiler is configured otherwise.
pub const DEFAULT_CURVE_SAMPLES: usize = 32;

/// Degenerate sample counts are floored to this.
pub const MIN_CURVE_SAMPLES: usize = 4;

/// A single curve keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    /// Position on the normalized metric axis.
    pub time: f32,
    /// Curve value at `time`.
    pub value: f32,
}

/// An authored probability curve.
///
/// Evaluated piecewise-linearly between keys and held constant beyond the
/// first and last key. A curve with no keys evaluates to 0 everywhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbabilityCurve {
    /// Keyframes. [`ProbabilityCurve::from_points`] sorts them by `time`;
    /// [`bake`] sorts a copy before sampling.
    pub keys: Vec<CurveKey>,
}

impl ProbabilityCurve {
    /// Build a curve from `(time, value)` pairs.
    #[must_use]
    pub fn from_points(points: &[(f32, f32)]) -> Self {
        let mut keys: Vec<CurveKey> = points
            .iter()
            .map(|&(time, value)| CurveKey { time, value })
            .collect();
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    /// A flat curve.
    #[must_use]
    pub fn constant(value: f32) -> Self {
        Self::from_points(&[(0.0, value), (1.0, value)])
    }

    /// The identity ramp `p(x) = x`.
    #[must_use]
    pub fn linear() -> Self {
        Self::from_points(&[(0.0, 0.0), (1.0, 1.0)])
    }

    /// Evaluate the authored curve at `t`.
    #[must_use]
    pub fn evaluate(&self, t: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return 0.0;
        };
        if t <= first.time {
            return first.value;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b.time {
                let span = b.time - a.time;
                if span <= f32::EPSILON {
                    return b.value;
                }
                let f = (t - a.time) / span;
                return a.value + (b.value - a.value) * f;
            }
        }
        self.keys.last().map_or(0.0, |k| k.value)
    }
}

/// Sample `curve` at `samples` uniformly spaced points over `[0, 1]`.
///
/// Values are clamped to `[0, 1]`; `samples` is floored to
/// [`MIN_CURVE_SAMPLES`].
#[must_use]
pub fn bake(curve: &ProbabilityCurve, samples: usize) -> Vec<f32> {
    let n = samples.max(MIN_CURVE_SAMPLES);
    let step = 1.0 / (n - 1) as f32;
    // Deserialized curves are not guaranteed to be in key order.
    let mut sorted = curve.clone();
    sorted.keys.sort_by(|a, b| a.time.total_cmp(&b.time));
    (0..n)
        .map(|i| clamp01(sorted.evaluate(i as f32 * step)))
        .collect()
}

/// Look up a baked table at normalized position `x` with linear interpolation.
///
/// `x` is clamped to `[0, 1]`. An empty table yields 0.
#[must_use]
pub fn sample_baked(table: &[f32], x: f32) -> f32 {
    match table.len() {
        0 => 0.0,
        1 => table[0],
        n => {
            let pos = clamp01(x) * (n - 1) as f32;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let f = pos - lo as f32;
            table[lo] + (table[hi] - table[lo]) * f
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_curve_is_zero() {
        let c = ProbabilityCurve::default();
        assert_eq!(c.evaluate(0.3), 0.0);
        assert!(bake(&c, 8).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn linear_interpolation_between_keys() {
        let c = ProbabilityCurve::from_points(&[(0.0, 0.0), (0.5, 1.0), (1.0, 0.0)]);
        assert!((c.evaluate(0.25) - 0.5).abs() < 1e-6);
        assert!((c.evaluate(0.5) - 1.0).abs() < 1e-6);
        assert!((c.evaluate(0.75) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn extrapolation_is_constant() {
        let c = ProbabilityCurve::from_points(&[(0.2, 0.3), (0.8, 0.9)]);
        assert!((c.evaluate(0.0) - 0.3).abs() < 1e-6);
        assert!((c.evaluate(1.0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn bake_clamps_and_floors_sample_count() {
        let c = ProbabilityCurve::from_points(&[(0.0, -1.0), (1.0, 3.0)]);
        let table = bake(&c, 0);
        assert_eq!(table.len(), MIN_CURVE_SAMPLES);
        assert!(table.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(table[0], 0.0);
        assert_eq!(table[MIN_CURVE_SAMPLES - 1], 1.0);
    }

    #[test]
    fn bake_default_length() {
        let table = bake(&ProbabilityCurve::linear(), DEFAULT_CURVE_SAMPLES);
        assert_eq!(table.len(), 32);
        assert!((table[31] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn peaked_table_interpolates_to_peak() {
        let table = [0.0, 1.0, 0.0];
        assert!((sample_baked(&table, 0.5) - 1.0).abs() < 1e-6);
        assert!((sample_baked(&table, 0.25) - 0.5).abs() < 1e-6);
        assert_eq!(sample_baked(&table, 1.5), 0.0);
    }

    #[test]
    fn sample_degenerate_tables() {
        assert_eq!(sample_baked(&[], 0.5), 0.0);
        assert_eq!(sample_baked(&[0.7], 0.1), 0.7);
    }
}
