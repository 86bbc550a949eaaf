//! # mores Core Library
//!
//! Game-agnostic rule engine that drives emergent social behaviour in a
//! simulated population.
//!
//! Authored definitions flow through the engine like this:
//!
//! - **Definitions** ([`definition`]): signals, metrics, effects, rule sets,
//!   domains and society profiles, loaded from TOML/JSON.
//! - **Compilation** ([`library::compiler`]): one pass turns a working set
//!   into an immutable, index-addressed [`RuntimeLibrary`].
//! - **Masks** ([`profile`]): per-society selection of domains, rule sets and
//!   metrics over the library's arrays.
//! - **Sampling** ([`sampler`]): raw observations accumulate per entity and
//!   flush into normalized samples on each metric's interval.
//! - **Evaluation** ([`evaluator`]): sampled metrics select candidate rules,
//!   which pass context, cooldown and probability gates.
//! - **Effects** ([`effects`]): fired rules mutate needs, resources,
//!   reputation, cohesion, health, relationships and intents, or emit signals.
//!
//! ## Concurrency Contract
//!
//! The [`RuntimeLibrary`] and [`ProfileMask`] are read-only after
//! construction and can be shared across threads freely. Per-entity state
//! ([`EntityRuntime`]) is exclusively owned, so sampling and evaluation run
//! in parallel across entities; effects are buffered as [`EffectCommand`]s
//! and applied in a serial second pass.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod bake;
pub mod config;
pub mod context;
pub mod curve;
pub mod definition;
pub mod effects;
pub mod error;
pub mod evaluator;
pub mod library;
pub mod metrics;
pub mod profile;
pub mod sampler;
pub mod state;
pub mod types;

pub use config::MoresConfig;
pub use context::SimulationContext;
pub use definition::DefinitionSet;
pub use effects::{EffectCommand, EffectHost, EffectOutcome};
pub use error::MoresError;
pub use evaluator::{EvaluationRequest, RandomSeed, RuleEvaluator};
pub use library::compiler::LibraryCompiler;
pub use library::RuntimeLibrary;
pub use profile::{ProfileMask, ProfileMasks};
pub use sampler::{MetricSample, MetricSampler, Observation};
pub use state::EntityRuntime;
pub use types::*;
