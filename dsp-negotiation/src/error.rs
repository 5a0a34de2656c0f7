//! Negotiation error taxonomy.

use dsp_policy::PolicyError;
use dsp_primitives::{ConsumerPid, ProviderPid};
use thiserror::Error;

use crate::messages::NegotiationEventType;
use crate::peer::PeerError;
use crate::state::NegotiationState;
use crate::store::StoreError;

/// Errors surfaced by the provider and consumer dispatchers.
///
/// Every variant aborts the operation before anything is persisted or sent.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// An initial request already carried a provider pid.
    #[error("providerPid must be blank on an initial request, got {0}")]
    ProviderPidNotBlank(ProviderPid),
    /// An initial offer already carried a consumer pid.
    #[error("consumerPid must be blank on an initial offer, got {0}")]
    ConsumerPidNotBlank(ConsumerPid),
    /// A negotiation was already started for the correlation id.
    #[error("contract negotiation for {pid} already exists")]
    AlreadyExists {
        /// The counterparty's pid the duplicate was detected on.
        pid: String,
    },
    /// No negotiation matches, or the correlation pair does not match.
    #[error("contract negotiation {pid} not found")]
    NotFound {
        /// The pid the caller addressed.
        pid: String,
    },
    /// No stored offer matches the agreement's target and parties.
    #[error("no offer for target {target} matches the agreement")]
    OfferNotFound {
        /// Agreement target.
        target: String,
    },
    /// The transition is not allowed from the current state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidState {
        /// Current state.
        from: NegotiationState,
        /// Requested state.
        to: NegotiationState,
    },
    /// The message contradicts the stored negotiation.
    #[error("validation failed: {0}")]
    ValidationFailure(String),
    /// The offer validation collaborator rejected the offer.
    #[error("offer {offer_id} is not valid")]
    PolicyNotValid {
        /// Rejected offer id.
        offer_id: String,
    },
    /// The event message carried an unexpected event type.
    #[error("expected {expected} event, got {actual}")]
    InvalidEventType {
        /// Event type the transition needs.
        expected: NegotiationEventType,
        /// Event type received.
        actual: NegotiationEventType,
    },
    /// The counterparty did not acknowledge the outbound message.
    #[error(transparent)]
    Peer(#[from] PeerError),
    /// The negotiation store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The policy administration collaborator failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl NegotiationError {
    /// Builds a [`NegotiationError::NotFound`] for the addressed pid.
    #[must_use]
    pub fn not_found(pid: impl ToString) -> Self {
        Self::NotFound {
            pid: pid.to_string(),
        }
    }

    /// Builds a [`NegotiationError::ValidationFailure`].
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailure(reason.into())
    }

    /// Maps the error onto the HTTP status a protocol endpoint answers with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } | Self::OfferNotFound { .. } => 404,
            Self::ProviderPidNotBlank(_)
            | Self::ConsumerPidNotBlank(_)
            | Self::ValidationFailure(_)
            | Self::PolicyNotValid { .. }
            | Self::InvalidEventType { .. } => 400,
            Self::AlreadyExists { .. }
            | Self::InvalidState { .. }
            | Self::Store(StoreError::Conflict { .. }) => 409,
            Self::Peer(_) => 502,
            Self::Store(_) | Self::Policy(_) => 500,
        }
    }
}

/// Result alias for negotiation operations.
pub type NegotiationResult<T> = Result<T, NegotiationError>;
