//! Queued signals.
//!
//! Gameplay code raises signals through the `on_*` constructors or
//! [`QueuedSignal::new`]; `EmitSignal` effects arrive as
//! [`mores_core::effects::SignalEvent`]s. Both wait in the [`SignalQueue`]
//! until the next tick delivers them to the sampler.

use std::collections::VecDeque;

use mores_core::effects::SignalEvent;
use mores_core::{EntityId, LibIndex};

/// One signal waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSignal {
    /// Signal index.
    pub signal: LibIndex,
    /// Observed value.
    pub value: f32,
    /// Entity that experienced the signal; its metrics observe it.
    pub subject: EntityId,
    /// Other party, if any.
    pub target: Option<EntityId>,
    /// Context id, if any.
    pub context: Option<String>,
}

impl QueuedSignal {
    /// Signal `signal` with `value` experienced by `subject`.
    #[must_use]
    pub fn new(signal: LibIndex, subject: EntityId, value: f32) -> Self {
        Self {
            signal,
            value,
            subject,
            target: None,
            context: None,
        }
    }

    /// Set the other party.
    #[must_use]
    pub fn with_target(mut self, target: EntityId) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the context id. Empty ids are dropped.
    #[must_use]
    pub fn in_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = (!context.is_empty()).then_some(context);
        self
    }
}

impl From<SignalEvent> for QueuedSignal {
    fn from(event: SignalEvent) -> Self {
        Self {
            signal: event.signal,
            value: event.value,
            subject: event.subject,
            target: Some(event.target),
            context: event.context,
        }
    }
}

/// FIFO of signals awaiting the next tick.
#[derive(Debug, Clone, Default)]
pub struct SignalQueue {
    entries: VecDeque<QueuedSignal>,
}

impl SignalQueue {
    /// Append a signal.
    pub fn push(&mut self, signal: QueuedSignal) {
        self.entries.push_back(signal);
    }

    /// Remove up to `limit` signals from the front.
    pub fn drain_up_to(&mut self, limit: usize) -> Vec<QueuedSignal> {
        let n = limit.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Signals waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Gameplay hooks
// ---------------------------------------------------------------------------

/// A trade between `buyer` and `seller`, observed by the buyer.
/// `fairness` runs from -1 (rip-off) to 1 (generous).
#[must_use]
pub fn on_trade(signal: LibIndex, buyer: EntityId, seller: EntityId, fairness: f32) -> QueuedSignal {
    QueuedSignal::new(signal, buyer, fairness).with_target(seller)
}

/// `victim` was harmed by `perpetrator` with the given severity.
#[must_use]
pub fn on_harmed(
    signal: LibIndex,
    victim: EntityId,
    perpetrator: EntityId,
    severity: f32,
) -> QueuedSignal {
    QueuedSignal::new(signal, victim, severity).with_target(perpetrator)
}

/// `helped` received help from `helper`.
#[must_use]
pub fn on_helped(signal: LibIndex, helped: EntityId, helper: EntityId, amount: f32) -> QueuedSignal {
    QueuedSignal::new(signal, helped, amount).with_target(helper)
}

/// A reading of an ambient quantity (noise, crowding, scarcity) at `place`.
#[must_use]
pub fn on_ambient(signal: LibIndex, observer: EntityId, value: f32, place: &str) -> QueuedSignal {
    QueuedSignal::new(signal, observer, value).in_context(place)
}
