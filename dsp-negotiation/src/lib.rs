//! Dataspace contract negotiation for providers and consumers.
//!
//! Both parties keep their own copy of a negotiation, correlated by the
//! `(providerPid, consumerPid)` pair. Inbound protocol messages are handled
//! by [`ProviderDispatcher`] and [`ConsumerDispatcher`]; their local
//! operations send the next message through a [`RemotePeer`] and commit the
//! transition only once the counterparty acknowledged it. Work on the same
//! negotiation is serialized, work on different negotiations runs in
//! parallel.

#![warn(missing_docs, clippy::pedantic)]

mod consumer;
mod dispatcher;
mod error;
mod events;
mod http;
mod locks;
mod loopback;
mod messages;
mod negotiation;
mod peer;
mod provider;
mod scheduler;
mod state;
mod store;

pub use consumer::ConsumerDispatcher;
pub use dispatcher::{NegotiationCore, NegotiationSettings};
pub use error::{NegotiationError, NegotiationResult};
pub use events::{
    CollectingPublisher, CompositePublisher, EventPublisher, NegotiationEvent,
    TracingEventPublisher,
};
pub use http::{HttpPeer, endpoint_url};
pub use locks::{AggregateGuard, AggregateLocks};
pub use loopback::LoopbackPeer;
pub use messages::{
    ContractAgreementMessage, ContractAgreementVerificationMessage,
    ContractNegotiationEventMessage, ContractNegotiationTerminationMessage,
    ContractOfferMessage, ContractRequestMessage, NegotiationAck, NegotiationEventType,
    ProtocolMessage,
};
pub use negotiation::{ContractNegotiation, Termination};
pub use peer::{PeerError, PeerResult, RemotePeer, RetryConfig, send_with_retry};
pub use provider::ProviderDispatcher;
pub use scheduler::{SchedulerError, SchedulerResult, StepScheduler};
pub use state::{NegotiationState, Role, TRANSITIONS, is_transition_allowed};
pub use store::{InMemoryNegotiationStore, NegotiationStore, StoreError, StoreResult};
