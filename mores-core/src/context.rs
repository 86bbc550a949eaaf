//! Explicit per-call context threaded through sampler, evaluator and applier.

use crate::library::{CompiledRule, RuntimeLibrary};
use crate::profile::ProfileMask;
use crate::types::{LibIndex, LodTier, SimTime};

/// Everything a tick needs from the outside: the compiled library, the
/// society's profile mask (if any) and the current simulated time.
///
/// Cheap to build; hosts create one per society per tick.
#[derive(Debug, Clone, Copy)]
pub struct SimulationContext<'a> {
    /// Compiled library.
    pub library: &'a RuntimeLibrary,
    /// Profile mask of the society being ticked. `None` disables filtering.
    pub mask: Option<&'a ProfileMask>,
    /// Current simulated time in seconds.
    pub now: SimTime,
}

impl<'a> SimulationContext<'a> {
    /// Context with no mask.
    #[must_use]
    pub fn new(library: &'a RuntimeLibrary, now: SimTime) -> Self {
        Self {
            library,
            mask: None,
            now,
        }
    }

    /// Attach a profile mask. `None` keeps everything enabled.
    #[must_use]
    pub fn with_mask(mut self, mask: Option<&'a ProfileMask>) -> Self {
        self.mask = mask;
        self
    }

    /// Same context at a different time.
    #[must_use]
    pub fn at(mut self, now: SimTime) -> Self {
        self.now = now;
        self
    }

    /// Whether `metric` is enabled under the mask.
    #[must_use]
    pub fn metric_enabled(&self, metric: LibIndex) -> bool {
        self.mask.is_none_or(|m| m.metric_enabled(metric))
    }

    /// Whether the rule set `index` is enabled under the mask.
    #[must_use]
    pub fn rule_set_enabled(&self, index: LibIndex) -> bool {
        self.mask.is_none_or(|m| m.rule_set_enabled(index))
    }

    /// Whether `rule`'s rule set was authored as enabled.
    #[must_use]
    pub fn rule_set_authored_enabled(&self, rule: &CompiledRule) -> bool {
        self.library
            .rule_sets
            .get(rule.rule_set as usize)
            .is_some_and(|rs| rs.enabled)
    }

    /// Detail tier from the mask; full detail when unmasked.
    #[must_use]
    pub fn lod(&self) -> LodTier {
        self.mask.map_or(LodTier::Full, ProfileMask::lod)
    }

    /// Profile tick-rate multiplier; 1 when unmasked.
    #[must_use]
    pub fn sample_interval_scale(&self) -> f32 {
        self.mask.map_or(1.0, ProfileMask::sample_interval_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmasked_enables_everything() {
        let lib = RuntimeLibrary::default();
        let ctx = SimulationContext::new(&lib, 3.0);
        assert!(ctx.metric_enabled(42));
        assert!(ctx.rule_set_enabled(7));
        assert_eq!(ctx.lod(), LodTier::Full);
        assert!((ctx.at(5.0).now - 5.0).abs() < f64::EPSILON);
    }
}
