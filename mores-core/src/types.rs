//! Core type definitions shared by every mores module.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Identifier of a simulated entity (member, society root, object).
///
/// Hosts own the id space; the engine only compares and stores ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Simulated time in seconds.
pub type SimTime = f64;

/// Zero-based index into one of the [`RuntimeLibrary`](crate::RuntimeLibrary) arrays.
pub type LibIndex = u32;

// ---------------------------------------------------------------------------
// Level of detail
// ---------------------------------------------------------------------------

/// How much simulation detail a society receives.
///
/// Ordered from finest to coarsest: `Full < Simplified < Aggregated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum LodTier {
    /// Every member is simulated individually.
    #[default]
    Full,
    /// Members are simulated with reduced fidelity.
    Simplified,
    /// Only society-level aggregates are simulated.
    Aggregated,
}

impl LodTier {
    /// Whether a signal requiring `minimum` detail is observed at this tier.
    ///
    /// A signal authored for `Simplified` is visible at `Full` and
    /// `Simplified`, and suppressed at `Aggregated`.
    #[must_use]
    pub fn allows(self, minimum: LodTier) -> bool {
        self <= minimum
    }
}

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Clamp into `[0, 1]`, mapping NaN to 0.
#[must_use]
pub fn clamp01(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}
