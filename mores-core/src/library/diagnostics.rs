//! Compile diagnostics: every record the compiler drops, and why.
//!
//! Compilation never fails. Tooling that wants to surface authoring
//! mistakes passes a callback to
//! [`LibraryCompiler::compile_with_diagnostics`](super::compiler::LibraryCompiler::compile_with_diagnostics).

use std::fmt;

/// Which table a duplicate id was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// `signals`.
    Signal,
    /// `metrics`.
    Metric,
    /// `effects`.
    Effect,
    /// `rule_sets`.
    RuleSet,
    /// `domains`.
    Domain,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signal => "signal",
            Self::Metric => "metric",
            Self::Effect => "effect",
            Self::RuleSet => "rule set",
            Self::Domain => "domain",
        };
        f.write_str(name)
    }
}

/// A single dropped or defaulted item.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileDiagnostic {
    /// A later record reused an id; the first occurrence was kept.
    DuplicateId {
        /// Table.
        kind: RecordKind,
        /// Repeated id.
        id: String,
    },
    /// A metric's signal does not exist; the metric was dropped.
    UnresolvedSignal {
        /// Dropped metric.
        metric_id: String,
        /// Missing signal.
        signal_id: String,
    },
    /// An `EmitSignal` effect names a missing signal; the effect was dropped.
    UnresolvedEmitSignal {
        /// Dropped effect.
        effect_id: String,
        /// Missing signal.
        signal_id: String,
    },
    /// A record names a missing domain; its domain link was cleared.
    UnresolvedDomain {
        /// Table of the referencing record.
        kind: RecordKind,
        /// Referencing record.
        id: String,
        /// Missing domain.
        domain_id: String,
    },
    /// A rule's metric does not exist; the rule was dropped.
    UnresolvedMetric {
        /// Owning rule set.
        rule_set_id: String,
        /// Position of the rule within its set.
        rule_position: usize,
        /// Missing metric.
        metric_id: String,
    },
    /// A rule effect's effect does not exist; the reference was skipped.
    UnresolvedEffect {
        /// Owning rule set.
        rule_set_id: String,
        /// Position of the rule within its set.
        rule_position: usize,
        /// Missing effect.
        effect_id: String,
    },
    /// A rule resolved none of its effects; the rule was dropped.
    EmptyRule {
        /// Owning rule set.
        rule_set_id: String,
        /// Position of the rule within its set.
        rule_position: usize,
    },
    /// A domain lists a missing rule set; the entry was skipped.
    UnresolvedRuleSet {
        /// Referencing domain.
        domain_id: String,
        /// Missing rule set.
        rule_set_id: String,
    },
    /// The configured curve sample count was too small and was raised.
    DegenerateSampleCount {
        /// Configured value.
        requested: usize,
        /// Value used.
        used: usize,
    },
}

impl CompileDiagnostic {
    /// Whether this diagnostic dropped authored content (as opposed to a
    /// harmless duplicate or a defaulted setting).
    #[must_use]
    pub fn is_drop(&self) -> bool {
        !matches!(
            self,
            Self::DuplicateId { .. } | Self::DegenerateSampleCount { .. }
        )
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId { kind, id } => {
                write!(f, "duplicate {kind} id '{id}', keeping the first")
            }
            Self::UnresolvedSignal { metric_id, signal_id } => write!(
                f,
                "metric '{metric_id}' dropped: unknown signal '{signal_id}'"
            ),
            Self::UnresolvedEmitSignal { effect_id, signal_id } => write!(
                f,
                "effect '{effect_id}' dropped: emits unknown signal '{signal_id}'"
            ),
            Self::UnresolvedDomain { kind, id, domain_id } => write!(
                f,
                "{kind} '{id}' references unknown domain '{domain_id}'"
            ),
            Self::UnresolvedMetric {
                rule_set_id,
                rule_position,
                metric_id,
            } => write!(
                f,
                "rule {rule_position} of '{rule_set_id}' dropped: unknown metric '{metric_id}'"
            ),
            Self::UnresolvedEffect {
                rule_set_id,
                rule_position,
                effect_id,
            } => write!(
                f,
                "rule {rule_position} of '{rule_set_id}': skipped unknown effect '{effect_id}'"
            ),
            Self::EmptyRule {
                rule_set_id,
                rule_position,
            } => write!(
                f,
                "rule {rule_position} of '{rule_set_id}' dropped: no resolvable effects"
            ),
            Self::UnresolvedRuleSet {
                domain_id,
                rule_set_id,
            } => write!(
                f,
                "domain '{domain_id}': skipped unknown rule set '{rule_set_id}'"
            ),
            Self::DegenerateSampleCount { requested, used } => write!(
                f,
                "curve sample count {requested} raised to {used}"
            ),
        }
    }
}
