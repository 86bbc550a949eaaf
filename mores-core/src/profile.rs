//! Society profile masks.
//!
//! A [`ProfileMask`] is compiled from a [`SocietyProfileDefinition`] against
//! one [`RuntimeLibrary`]. Each mask is a bit set exactly as long as the
//! corresponding library array; bit `i` is set iff item `i` is enabled.
//!
//! Enabling is transitive:
//!
//! ```text
//!   domain listed            -> domain bit
//!   rule set listed          -> rule set bit
//!   domain bit               -> every member rule set bit
//!   rule set bit             -> every metric its rules listen to
//!   metric listed            -> metric bit
//! ```
//!
//! Entities with no profile use no mask at all, which means everything is
//! enabled.

use std::collections::HashMap;

use bitvec::prelude::*;
use tracing::{debug, warn};

use crate::definition::SocietyProfileDefinition;
use crate::library::RuntimeLibrary;
use crate::types::{LibIndex, LodTier};

/// Compiled per-society selection over a runtime library.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileMask {
    id: String,
    rule_sets: BitVec,
    metrics: BitVec,
    domains: BitVec,
    lod: LodTier,
    sample_interval_scale: f32,
}

impl ProfileMask {
    /// Compile `profile` against `library`. Unknown ids are skipped.
    #[must_use]
    pub fn compile(profile: &SocietyProfileDefinition, library: &RuntimeLibrary) -> Self {
        let mut domains = bitvec![0; library.domains.len()];
        let mut rule_sets = bitvec![0; library.rule_sets.len()];
        let mut metrics = bitvec![0; library.metrics.len()];

        for id in &profile.domain_ids {
            match library.domain_index(id) {
                Some(d) => domains.set(d as usize, true),
                None => warn!(profile = %profile.id, domain = %id, "Profile names unknown domain"),
            }
        }
        for id in &profile.rule_set_ids {
            match library.rule_set_index(id) {
                Some(r) => rule_sets.set(r as usize, true),
                None => warn!(profile = %profile.id, rule_set = %id, "Profile names unknown rule set"),
            }
        }
        for d in domains.iter_ones() {
            for &rs in library.rule_sets_for_domain(d as LibIndex) {
                rule_sets.set(rs as usize, true);
            }
        }
        for rule in &library.rules {
            if bit(&rule_sets, rule.rule_set) {
                metrics.set(rule.metric as usize, true);
            }
        }
        for id in &profile.metric_ids {
            match library.metric_index(id) {
                Some(m) => metrics.set(m as usize, true),
                None => warn!(profile = %profile.id, metric = %id, "Profile names unknown metric"),
            }
        }

        let sample_interval_scale = if profile.sample_interval_scale.is_finite()
            && profile.sample_interval_scale > 0.0
        {
            profile.sample_interval_scale
        } else {
            1.0
        };

        debug!(
            profile = %profile.id,
            domains = domains.count_ones(),
            rule_sets = rule_sets.count_ones(),
            metrics = metrics.count_ones(),
            "Compiled profile mask"
        );

        Self {
            id: profile.id.clone(),
            rule_sets,
            metrics,
            domains,
            lod: profile.lod,
            sample_interval_scale,
        }
    }

    /// A mask with every bit set, at full detail.
    #[must_use]
    pub fn all(library: &RuntimeLibrary) -> Self {
        Self {
            id: String::new(),
            rule_sets: bitvec![1; library.rule_sets.len()],
            metrics: bitvec![1; library.metrics.len()],
            domains: bitvec![1; library.domains.len()],
            lod: LodTier::Full,
            sample_interval_scale: 1.0,
        }
    }

    /// Profile id this mask was compiled from. Empty for [`ProfileMask::all`].
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether rule set `index` is enabled. Out-of-range indices are disabled.
    #[must_use]
    pub fn rule_set_enabled(&self, index: LibIndex) -> bool {
        bit(&self.rule_sets, index)
    }

    /// Whether metric `index` is enabled.
    #[must_use]
    pub fn metric_enabled(&self, index: LibIndex) -> bool {
        bit(&self.metrics, index)
    }

    /// Whether domain `index` is enabled.
    #[must_use]
    pub fn domain_enabled(&self, index: LibIndex) -> bool {
        bit(&self.domains, index)
    }

    /// Enabled metric indices, ascending.
    pub fn enabled_metrics(&self) -> impl Iterator<Item = LibIndex> + '_ {
        self.metrics.iter_ones().map(|i| i as LibIndex)
    }

    /// Number of enabled rule sets.
    #[must_use]
    pub fn enabled_rule_set_count(&self) -> usize {
        self.rule_sets.count_ones()
    }

    /// Detail tier for members of this society.
    #[must_use]
    pub fn lod(&self) -> LodTier {
        self.lod
    }

    /// Multiplier on every metric's sample interval.
    #[must_use]
    pub fn sample_interval_scale(&self) -> f32 {
        self.sample_interval_scale
    }
}

fn bit(bits: &BitSlice, index: LibIndex) -> bool {
    bits.get(index as usize).is_some_and(|b| *b)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Compiled masks keyed by profile id.
#[derive(Debug, Clone, Default)]
pub struct ProfileMasks {
    masks: HashMap<String, ProfileMask>,
}

impl ProfileMasks {
    /// Compile every profile; later duplicates of an id are ignored.
    #[must_use]
    pub fn compile_all(profiles: &[SocietyProfileDefinition], library: &RuntimeLibrary) -> Self {
        let mut masks = HashMap::with_capacity(profiles.len());
        for profile in profiles {
            if masks.contains_key(&profile.id) {
                warn!(profile = %profile.id, "Duplicate profile id, keeping the first");
                continue;
            }
            masks.insert(profile.id.clone(), ProfileMask::compile(profile, library));
        }
        Self { masks }
    }

    /// Mask for `profile_id`. `None` means no filtering.
    #[must_use]
    pub fn get(&self, profile_id: &str) -> Option<&ProfileMask> {
        self.masks.get(profile_id)
    }

    /// Number of compiled masks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    /// Whether no masks were compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}
