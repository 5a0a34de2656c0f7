//! Consumer side of the negotiation.

use std::sync::{Arc, Weak};

use dsp_policy::{Offer, PolicyAdministration};
use dsp_primitives::{ConsumerPid, PidPair, ProviderPid};
use tracing::{info, warn};

use crate::dispatcher::{NegotiationCore, create_enforcement, revoke_enforcement};
use crate::error::{NegotiationError, NegotiationResult};
use crate::events::NegotiationEvent;
use crate::messages::{
    ContractAgreementMessage, ContractAgreementVerificationMessage, ContractNegotiationEventMessage,
    ContractNegotiationTerminationMessage, ContractOfferMessage, ContractRequestMessage,
    NegotiationEventType, ProtocolMessage,
};
use crate::negotiation::{ContractNegotiation, Termination};
use crate::peer::PeerError;
use crate::state::{NegotiationState, Role};

const ROLE: Role = Role::Consumer;

/// Handles the consumer's half of contract negotiations.
///
/// Inbound handlers are addressed by consumer pid. Once the provider's
/// `FINALIZED` event arrives the consumer opens its own enforcement record
/// and asks for the data transfer to be initialized.
pub struct ConsumerDispatcher {
    core: NegotiationCore,
    policy_administration: Arc<dyn PolicyAdministration>,
    this: Weak<Self>,
}

impl std::fmt::Debug for ConsumerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDispatcher")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl ConsumerDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        core: NegotiationCore,
        policy_administration: Arc<dyn PolicyAdministration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core,
            policy_administration,
            this: this.clone(),
        })
    }

    /// Returns the shared core.
    #[must_use]
    pub fn core(&self) -> &NegotiationCore {
        &self.core
    }

    /// Returns the negotiation with the given consumer pid.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::NotFound`] when no consumer-side negotiation has
    /// that pid.
    pub async fn negotiation_by_consumer_pid(
        &self,
        consumer_pid: &ConsumerPid,
    ) -> NegotiationResult<ContractNegotiation> {
        self.core
            .find_by_consumer_pid(ROLE, consumer_pid)
            .await?
            .ok_or_else(|| NegotiationError::not_found(consumer_pid))
    }

    /// Starts a negotiation from a provider's initial offer.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::ConsumerPidNotBlank`],
    /// [`NegotiationError::AlreadyExists`] when the provider pid was seen
    /// before, or a store failure.
    pub async fn handle_contract_offer_message(
        &self,
        message: ContractOfferMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        if !message.consumer_pid.is_blank() {
            return Err(NegotiationError::ConsumerPidNotBlank(message.consumer_pid));
        }
        if message.provider_pid.is_blank() {
            return Err(NegotiationError::validation("providerPid is required"));
        }
        if message.callback_address.trim().is_empty() {
            return Err(NegotiationError::validation("callbackAddress is required"));
        }

        let _guard = self
            .core
            .lock(format!("offer:{}", message.provider_pid))
            .await;

        if self
            .core
            .find_by_provider_pid(ROLE, &message.provider_pid)
            .await?
            .is_some()
        {
            warn!(provider_pid = %message.provider_pid, "duplicate contract offer");
            return Err(NegotiationError::AlreadyExists {
                pid: message.provider_pid.to_string(),
            });
        }

        let original_id = message.offer.id().to_owned();
        let negotiation = ContractNegotiation::new(
            PidPair::new(message.provider_pid, ConsumerPid::generate()),
            ROLE,
            NegotiationState::Offered,
            message.callback_address,
            message.offer.with_original_id(original_id),
        );
        let saved = self.core.persist(&negotiation, None).await?;
        self.after_provider_offer(&saved);
        Ok(saved)
    }

    /// Handles a provider counter-offer on a requested negotiation.
    ///
    /// # Errors
    ///
    /// `NotFound` on a pid mismatch, `ValidationFailure` when the offer left
    /// the lineage, `InvalidState` outside `REQUESTED`.
    pub async fn handle_contract_offer_message_as_counteroffer(
        &self,
        consumer_pid: &ConsumerPid,
        message: ContractOfferMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self
            .correlated(consumer_pid, &message.provider_pid, &message.consumer_pid)
            .await?;

        negotiation.ensure_same_lineage(&message.offer)?;
        negotiation.ensure_transition(NegotiationState::Offered)?;

        let previous = negotiation.state();
        negotiation.push_offer(message.offer);
        negotiation.transition_to(NegotiationState::Offered)?;
        let saved = self.core.persist(&negotiation, Some(previous)).await?;
        self.after_provider_offer(&saved);
        Ok(saved)
    }

    /// Stores the provider's agreement.
    ///
    /// # Errors
    ///
    /// `NotFound` on a pid mismatch, [`NegotiationError::OfferNotFound`] when
    /// no stored offer has the agreement's target and parties, or
    /// `InvalidState` unless `REQUESTED` or `ACCEPTED`.
    pub async fn handle_contract_agreement_message(
        &self,
        consumer_pid: &ConsumerPid,
        message: ContractAgreementMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self
            .correlated(consumer_pid, &message.provider_pid, &message.consumer_pid)
            .await?;

        if !negotiation.has_offer_for(&message.agreement) {
            return Err(NegotiationError::OfferNotFound {
                target: message.agreement.target().to_owned(),
            });
        }
        negotiation.ensure_transition(NegotiationState::Agreed)?;

        let previous = negotiation.state();
        negotiation.attach_agreement(message.agreement);
        negotiation.transition_to(NegotiationState::Agreed)?;
        let saved = self.core.persist(&negotiation, Some(previous)).await?;

        if self.core.settings().automatic() {
            self.schedule_verification(saved.consumer_pid());
        }
        Ok(saved)
    }

    /// Completes the negotiation on the provider's `FINALIZED` event.
    ///
    /// # Errors
    ///
    /// `InvalidEventType` unless the event is `FINALIZED`, `NotFound` on a
    /// pid mismatch, `InvalidState` unless `VERIFIED`, or `Policy` when the
    /// enforcement record cannot be created.
    pub async fn handle_contract_negotiation_event_message_finalize(
        &self,
        consumer_pid: &ConsumerPid,
        message: ContractNegotiationEventMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        if message.event_type != NegotiationEventType::Finalized {
            return Err(NegotiationError::InvalidEventType {
                expected: NegotiationEventType::Finalized,
                actual: message.event_type,
            });
        }

        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self
            .correlated(consumer_pid, &message.provider_pid, &message.consumer_pid)
            .await?;
        negotiation.ensure_transition(NegotiationState::Finalized)?;
        let agreement_id = negotiation
            .agreement()
            .map(|agreement| agreement.id().clone())
            .ok_or(NegotiationError::InvalidState {
                from: negotiation.state(),
                to: NegotiationState::Finalized,
            })?;

        let administration = self.policy_administration.as_ref();
        let created = create_enforcement(administration, &agreement_id).await?;

        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Finalized)?;
        let saved = match self.core.persist(&negotiation, Some(previous)).await {
            Ok(saved) => saved,
            Err(err) => {
                if created {
                    revoke_enforcement(administration, &agreement_id).await;
                }
                return Err(err);
            }
        };

        info!(
            consumer_pid = %saved.consumer_pid(),
            agreement_id = %agreement_id,
            "requesting transfer initialization"
        );
        self.core
            .publish(NegotiationEvent::TransferInitializationRequested {
                pids: saved.pids(),
                agreement_id,
            });
        Ok(saved)
    }

    /// Terminates on the provider's request.
    ///
    /// # Errors
    ///
    /// `NotFound` on a pid mismatch, `InvalidState` once terminated or
    /// finalized.
    pub async fn handle_contract_negotiation_termination_message(
        &self,
        consumer_pid: &ConsumerPid,
        message: ContractNegotiationTerminationMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self
            .correlated(consumer_pid, &message.provider_pid, &message.consumer_pid)
            .await?;
        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Terminated)?;
        negotiation.record_termination(Termination {
            code: message.code,
            reason: message.reason,
            terminated_by: Role::Provider,
        });
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Opens a negotiation by requesting `offer` from the provider at
    /// `provider_address`.
    ///
    /// # Errors
    ///
    /// `Peer` when the provider does not acknowledge with a provider pid.
    pub async fn request_negotiation(
        &self,
        provider_address: &str,
        offer: Offer,
    ) -> NegotiationResult<ContractNegotiation> {
        let consumer_pid = ConsumerPid::generate();
        let _guard = self.core.lock(consumer_pid.as_str()).await;

        let message = ProtocolMessage::ContractRequest(ContractRequestMessage {
            provider_pid: ProviderPid::blank(),
            consumer_pid: consumer_pid.clone(),
            offer: offer.clone(),
            callback_address: self.core.settings().callback_address().to_owned(),
        });
        let ack = self.core.send(provider_address, &message).await?;
        if ack.provider_pid.is_blank() {
            return Err(PeerError::Protocol("acknowledgement carried no providerPid".to_owned()).into());
        }

        let original_id = offer.id().to_owned();
        let negotiation = ContractNegotiation::new(
            PidPair::new(ack.provider_pid, consumer_pid),
            ROLE,
            NegotiationState::Requested,
            provider_address,
            offer.with_original_id(original_id),
        );
        self.core.persist(&negotiation, None).await
    }

    /// Answers an offer with a counter-request.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` outside `OFFERED`, `ValidationFailure` when
    /// the offer leaves the lineage, or `Peer`.
    pub async fn send_counter_request(
        &self,
        consumer_pid: &ConsumerPid,
        offer: Offer,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_consumer_pid(consumer_pid).await?;
        negotiation.ensure_transition(NegotiationState::Requested)?;
        negotiation.ensure_same_lineage(&offer)?;

        let message = ProtocolMessage::ContractRequest(ContractRequestMessage {
            provider_pid: negotiation.provider_pid().clone(),
            consumer_pid: negotiation.consumer_pid().clone(),
            offer: offer.clone(),
            callback_address: self.core.settings().callback_address().to_owned(),
        });
        self.core
            .send(negotiation.callback_address(), &message)
            .await?;

        let previous = negotiation.state();
        negotiation.push_offer(offer);
        negotiation.transition_to(NegotiationState::Requested)?;
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Accepts the provider's current offer.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` outside `OFFERED`, or `Peer`.
    pub async fn accept_offer(
        &self,
        consumer_pid: &ConsumerPid,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_consumer_pid(consumer_pid).await?;
        negotiation.ensure_transition(NegotiationState::Accepted)?;

        let message = ProtocolMessage::NegotiationEvent(ContractNegotiationEventMessage {
            provider_pid: negotiation.provider_pid().clone(),
            consumer_pid: negotiation.consumer_pid().clone(),
            event_type: NegotiationEventType::Accepted,
        });
        self.core
            .send(negotiation.callback_address(), &message)
            .await?;

        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Accepted)?;
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Confirms the received agreement.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless `AGREED`, or `Peer`.
    pub async fn verify_agreement(
        &self,
        consumer_pid: &ConsumerPid,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_consumer_pid(consumer_pid).await?;
        negotiation.ensure_transition(NegotiationState::Verified)?;

        let message =
            ProtocolMessage::AgreementVerification(ContractAgreementVerificationMessage {
                provider_pid: negotiation.provider_pid().clone(),
                consumer_pid: negotiation.consumer_pid().clone(),
            });
        self.core
            .send(negotiation.callback_address(), &message)
            .await?;

        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Verified)?;
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Terminates the negotiation and notifies the provider.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` once terminated or finalized, or `Peer`.
    pub async fn terminate(
        &self,
        consumer_pid: &ConsumerPid,
        code: Option<String>,
        reason: Option<String>,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(consumer_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_consumer_pid(consumer_pid).await?;
        negotiation.ensure_transition(NegotiationState::Terminated)?;

        let message = ProtocolMessage::Termination {
            recipient: Role::Provider,
            message: ContractNegotiationTerminationMessage {
                provider_pid: negotiation.provider_pid().clone(),
                consumer_pid: negotiation.consumer_pid().clone(),
                code: code.clone(),
                reason: reason.clone(),
            },
        };
        self.core
            .send(negotiation.callback_address(), &message)
            .await?;

        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Terminated)?;
        negotiation.record_termination(Termination {
            code,
            reason,
            terminated_by: ROLE,
        });
        self.core.persist(&negotiation, Some(previous)).await
    }

    async fn correlated(
        &self,
        addressed: &ConsumerPid,
        provider_pid: &ProviderPid,
        consumer_pid: &ConsumerPid,
    ) -> NegotiationResult<ContractNegotiation> {
        if consumer_pid != addressed {
            return Err(NegotiationError::not_found(addressed));
        }
        self.core
            .find_correlated(ROLE, provider_pid, consumer_pid, addressed.as_str())
            .await
    }

    fn after_provider_offer(&self, negotiation: &ContractNegotiation) {
        if self.core.settings().automatic() {
            self.schedule_acceptance(negotiation.consumer_pid());
        } else {
            self.core.request_review(negotiation);
        }
    }

    fn schedule_acceptance(&self, consumer_pid: &ConsumerPid) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let consumer_pid = consumer_pid.clone();
        self.core.schedule("accept_offer", async move {
            this.accept_offer(&consumer_pid).await
        });
    }

    fn schedule_verification(&self, consumer_pid: &ConsumerPid) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let consumer_pid = consumer_pid.clone();
        self.core.schedule("verify_agreement", async move {
            this.verify_agreement(&consumer_pid).await
        });
    }
}
