//! Negotiation events published to audit and downstream collaborators.

use std::sync::{Arc, Mutex, PoisonError};

use dsp_primitives::{AgreementId, PidPair};
use serde::Serialize;
use tracing::info;

use crate::state::{NegotiationState, Role};

/// Event emitted by the dispatchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NegotiationEvent {
    /// A negotiation changed state.
    StateChanged {
        /// Negotiation pids.
        pids: PidPair,
        /// Local role.
        role: Role,
        /// Previous state; `None` for a new negotiation.
        from: Option<NegotiationState>,
        /// New state.
        to: NegotiationState,
    },
    /// An inbound offer waits for an operator decision.
    OfferNeedsReview {
        /// Negotiation pids.
        pids: PidPair,
        /// Local role.
        role: Role,
        /// Offer to review.
        offer_id: String,
    },
    /// A finalized agreement is ready for data transfer.
    TransferInitializationRequested {
        /// Negotiation pids.
        pids: PidPair,
        /// The finalized agreement.
        agreement_id: AgreementId,
    },
}

impl NegotiationEvent {
    /// Returns the pids of the negotiation the event concerns.
    #[must_use]
    pub fn pids(&self) -> &PidPair {
        match self {
            Self::StateChanged { pids, .. }
            | Self::OfferNeedsReview { pids, .. }
            | Self::TransferInitializationRequested { pids, .. } => pids,
        }
    }
}

/// Receives negotiation events.
pub trait EventPublisher: Send + Sync {
    /// Publishes the event.
    fn publish(&self, event: NegotiationEvent);
}

/// Publisher that logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: NegotiationEvent) {
        match &event {
            NegotiationEvent::StateChanged {
                pids,
                role,
                from,
                to,
            } => info!(%pids, %role, ?from, %to, "contract negotiation state changed"),
            NegotiationEvent::OfferNeedsReview {
                pids,
                role,
                offer_id,
            } => info!(%pids, %role, offer_id = %offer_id, "offer needs manual review"),
            NegotiationEvent::TransferInitializationRequested { pids, agreement_id } => {
                info!(%pids, %agreement_id, "transfer initialization requested");
            }
        }
    }
}

/// Publisher that keeps events in memory, for tests and demos.
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    events: Mutex<Vec<NegotiationEvent>>,
}

impl CollectingPublisher {
    /// Creates a new collecting publisher.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of the events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<NegotiationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns the events published so far.
    #[must_use]
    pub fn drain(&self) -> Vec<NegotiationEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.drain(..).collect()
    }

    /// Counts events matching the predicate.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&NegotiationEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl EventPublisher for CollectingPublisher {
    fn publish(&self, event: NegotiationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Forwards every event to each inner publisher.
#[derive(Default)]
pub struct CompositePublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositePublisher {
    /// Creates a composite from the supplied publishers.
    #[must_use]
    pub fn new<I>(publishers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn EventPublisher>>,
    {
        Self {
            publishers: publishers.into_iter().collect(),
        }
    }
}

impl EventPublisher for CompositePublisher {
    fn publish(&self, event: NegotiationEvent) {
        for publisher in &self.publishers {
            publisher.publish(event.clone());
        }
    }
}
