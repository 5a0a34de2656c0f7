//! Protocol messages exchanged between provider and consumer.

use std::fmt;

use dsp_policy::{Agreement, Offer};
use dsp_primitives::{ConsumerPid, ProviderPid};
use serde::{Deserialize, Serialize};

use crate::negotiation::ContractNegotiation;
use crate::state::{NegotiationState, Role};

/// Consumer proposal, initial (blank provider pid) or counter-request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRequestMessage {
    /// Provider pid; blank on the initial request.
    #[serde(default, skip_serializing_if = "ProviderPid::is_blank")]
    pub provider_pid: ProviderPid,
    /// Consumer pid.
    pub consumer_pid: ConsumerPid,
    /// Proposed offer.
    pub offer: Offer,
    /// Where the provider sends its replies.
    pub callback_address: String,
}

/// Provider proposal, initial (blank consumer pid) or counter-offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractOfferMessage {
    /// Provider pid.
    pub provider_pid: ProviderPid,
    /// Consumer pid; blank on the initial offer.
    #[serde(default, skip_serializing_if = "ConsumerPid::is_blank")]
    pub consumer_pid: ConsumerPid,
    /// Proposed offer.
    pub offer: Offer,
    /// Where the consumer sends its replies.
    pub callback_address: String,
}

/// Agreement issued by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAgreementMessage {
    /// Provider pid.
    pub provider_pid: ProviderPid,
    /// Consumer pid.
    pub consumer_pid: ConsumerPid,
    /// The agreement.
    pub agreement: Agreement,
    /// Where the consumer sends its replies.
    pub callback_address: String,
}

/// Consumer confirmation that the agreement was verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAgreementVerificationMessage {
    /// Provider pid.
    pub provider_pid: ProviderPid,
    /// Consumer pid.
    pub consumer_pid: ConsumerPid,
}

/// Event types carried by [`ContractNegotiationEventMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationEventType {
    /// Consumer accepted the provider's offer.
    Accepted,
    /// Provider finalized the agreement.
    Finalized,
}

impl fmt::Display for NegotiationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("ACCEPTED"),
            Self::Finalized => f.write_str("FINALIZED"),
        }
    }
}

/// State change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractNegotiationEventMessage {
    /// Provider pid.
    pub provider_pid: ProviderPid,
    /// Consumer pid.
    pub consumer_pid: ConsumerPid,
    /// Event being signalled.
    pub event_type: NegotiationEventType,
}

/// Termination notice, from either party.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractNegotiationTerminationMessage {
    /// Provider pid.
    pub provider_pid: ProviderPid,
    /// Consumer pid.
    pub consumer_pid: ConsumerPid,
    /// Machine readable termination code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outbound message together with the party it is addressed to.
#[derive(Debug, Clone)]
pub enum ProtocolMessage {
    /// Consumer to provider.
    ContractRequest(ContractRequestMessage),
    /// Provider to consumer.
    ContractOffer(ContractOfferMessage),
    /// Provider to consumer.
    ContractAgreement(ContractAgreementMessage),
    /// Consumer to provider.
    AgreementVerification(ContractAgreementVerificationMessage),
    /// `ACCEPTED` goes to the provider, `FINALIZED` to the consumer.
    NegotiationEvent(ContractNegotiationEventMessage),
    /// Either direction.
    Termination {
        /// Role of the receiving party.
        recipient: Role,
        /// The notice.
        message: ContractNegotiationTerminationMessage,
    },
}

impl ProtocolMessage {
    /// Returns the role of the party that handles the message.
    #[must_use]
    pub fn recipient(&self) -> Role {
        match self {
            Self::ContractRequest(_) | Self::AgreementVerification(_) => Role::Provider,
            Self::ContractOffer(_) | Self::ContractAgreement(_) => Role::Consumer,
            Self::NegotiationEvent(message) => match message.event_type {
                NegotiationEventType::Accepted => Role::Provider,
                NegotiationEventType::Finalized => Role::Consumer,
            },
            Self::Termination { recipient, .. } => *recipient,
        }
    }

    /// Returns the endpoint path relative to the recipient's callback address.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::ContractRequest(message) if message.provider_pid.is_blank() => {
                "/negotiations/request".to_owned()
            }
            Self::ContractRequest(message) => {
                format!("/negotiations/{}/request", message.provider_pid)
            }
            Self::ContractOffer(message) if message.consumer_pid.is_blank() => {
                "/negotiations/offers".to_owned()
            }
            Self::ContractOffer(message) => {
                format!("/negotiations/{}/offers", message.consumer_pid)
            }
            Self::ContractAgreement(message) => {
                format!("/negotiations/{}/agreement", message.consumer_pid)
            }
            Self::AgreementVerification(message) => {
                format!("/negotiations/{}/agreement/verification", message.provider_pid)
            }
            Self::NegotiationEvent(message) => match message.event_type {
                NegotiationEventType::Accepted => {
                    format!("/negotiations/{}/events", message.provider_pid)
                }
                NegotiationEventType::Finalized => {
                    format!("/negotiations/{}/events", message.consumer_pid)
                }
            },
            Self::Termination { recipient, message } => {
                let pid = match recipient {
                    Role::Provider => message.provider_pid.as_str(),
                    Role::Consumer => message.consumer_pid.as_str(),
                };
                format!("/negotiations/{pid}/termination")
            }
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContractRequest(_) => "ContractRequestMessage",
            Self::ContractOffer(_) => "ContractOfferMessage",
            Self::ContractAgreement(_) => "ContractAgreementMessage",
            Self::AgreementVerification(_) => "ContractAgreementVerificationMessage",
            Self::NegotiationEvent(_) => "ContractNegotiationEventMessage",
            Self::Termination { .. } => "ContractNegotiationTerminationMessage",
        }
    }

    /// Serializes the message body.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Self::ContractRequest(message) => serde_json::to_vec(message),
            Self::ContractOffer(message) => serde_json::to_vec(message),
            Self::ContractAgreement(message) => serde_json::to_vec(message),
            Self::AgreementVerification(message) => serde_json::to_vec(message),
            Self::NegotiationEvent(message) => serde_json::to_vec(message),
            Self::Termination { message, .. } => serde_json::to_vec(message),
        }
    }
}

/// Acknowledgement returned by the recipient of a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationAck {
    /// Provider pid as known to the recipient.
    pub provider_pid: ProviderPid,
    /// Consumer pid as known to the recipient.
    pub consumer_pid: ConsumerPid,
    /// Recipient's state after handling the message.
    pub state: NegotiationState,
}

impl From<&ContractNegotiation> for NegotiationAck {
    fn from(negotiation: &ContractNegotiation) -> Self {
        Self {
            provider_pid: negotiation.provider_pid().clone(),
            consumer_pid: negotiation.consumer_pid().clone(),
            state: negotiation.state(),
        }
    }
}
