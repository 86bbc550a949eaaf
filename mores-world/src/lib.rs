//! # mores-world: Reference Host for the mores Engine
//!
//! `mores-core` never owns needs, resources, health or schedules; it talks to
//! them through [`mores_core::EffectHost`]. This crate is a complete
//! in-memory host: entity stores, a signal queue, a sample log and a
//! schedule outbox, driven by a two-phase tick.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 SocietyWorld                 │
//! │  ┌────────────┐  ┌────────────┐  ┌────────┐  │
//! │  │ Components │  │  Systems   │  │ Events │  │
//! │  └─────┬──────┘  └─────┬──────┘  └───┬────┘  │
//! │        │               │             │       │
//! │        ▼               ▼             ▼       │
//! │   ┌──────────────────────────────────────┐   │
//! │   │ mores-core (library, masks, sampler, │   │
//! │   │   evaluator, effects, telemetry)     │   │
//! │   └──────────────────────────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `components`: per-entity stores (needs, resources, reputation,
//!   cohesion, health, relationships, intents) and society records
//! - `events`: queued signals and the `on_*` constructors gameplay code uses
//! - `clock`: per-society time source
//! - `world`: [`SocietyWorld`]: spawning, observation, the effect host
//! - `systems`: the tick: signal delivery, parallel evaluation, serial apply

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod clock;
pub mod components;
pub mod events;
pub mod systems;
pub mod world;

pub use clock::{FixedClock, SocietyClock};
pub use components::{EntityRecord, EntityStores, SocietyRecord};
pub use events::{QueuedSignal, SignalQueue};
pub use systems::TickReport;
pub use world::SocietyWorld;
