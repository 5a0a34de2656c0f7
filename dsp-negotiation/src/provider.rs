//! Provider side of the negotiation.

use std::sync::{Arc, Weak};

use chrono::Utc;
use dsp_policy::{Agreement, Offer, OfferValidator, PolicyAdministration};
use dsp_primitives::{AgreementId, ConsumerPid, PidPair, ProviderPid};
use tracing::{info, warn};

use crate::dispatcher::{NegotiationCore, create_enforcement, revoke_enforcement};
use crate::error::{NegotiationError, NegotiationResult};
use crate::messages::{
    ContractAgreementMessage, ContractAgreementVerificationMessage, ContractNegotiationEventMessage,
    ContractNegotiationTerminationMessage, ContractOfferMessage, ContractRequestMessage,
    NegotiationEventType, ProtocolMessage,
};
use crate::negotiation::{ContractNegotiation, Termination};
use crate::peer::PeerError;
use crate::state::{NegotiationState, Role};

const ROLE: Role = Role::Provider;

/// Handles the provider's half of contract negotiations.
///
/// Inbound handlers are keyed by the provider pid from the request path and
/// check that the message's pid pair matches the stored negotiation exactly;
/// any mismatch is reported as [`NegotiationError::NotFound`]. Local
/// operations deliver their message to the consumer first and only commit
/// the transition once it was acknowledged.
pub struct ProviderDispatcher {
    core: NegotiationCore,
    offer_validator: Arc<dyn OfferValidator>,
    policy_administration: Arc<dyn PolicyAdministration>,
    this: Weak<Self>,
}

impl std::fmt::Debug for ProviderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDispatcher")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl ProviderDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        core: NegotiationCore,
        offer_validator: Arc<dyn OfferValidator>,
        policy_administration: Arc<dyn PolicyAdministration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core,
            offer_validator,
            policy_administration,
            this: this.clone(),
        })
    }

    /// Returns the shared core.
    #[must_use]
    pub fn core(&self) -> &NegotiationCore {
        &self.core
    }

    /// Returns the negotiation with the given provider pid.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::NotFound`] when no provider-side negotiation has
    /// that pid.
    pub async fn negotiation_by_provider_pid(
        &self,
        provider_pid: &ProviderPid,
    ) -> NegotiationResult<ContractNegotiation> {
        self.core
            .find_by_provider_pid(ROLE, provider_pid)
            .await?
            .ok_or_else(|| NegotiationError::not_found(provider_pid))
    }

    /// Starts a negotiation from a consumer's initial request.
    ///
    /// The new negotiation is stored in `REQUESTED` under a freshly
    /// generated provider pid. Replaying the request yields
    /// [`NegotiationError::AlreadyExists`].
    ///
    /// # Errors
    ///
    /// [`NegotiationError::ProviderPidNotBlank`], `AlreadyExists`,
    /// [`NegotiationError::PolicyNotValid`], or a store failure.
    pub async fn handle_contract_request_message(
        &self,
        message: ContractRequestMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        if !message.provider_pid.is_blank() {
            return Err(NegotiationError::ProviderPidNotBlank(message.provider_pid));
        }
        if message.consumer_pid.is_blank() {
            return Err(NegotiationError::validation("consumerPid is required"));
        }
        if message.callback_address.trim().is_empty() {
            return Err(NegotiationError::validation("callbackAddress is required"));
        }

        let _guard = self
            .core
            .lock(format!("request:{}", message.consumer_pid))
            .await;

        if self
            .core
            .find_by_consumer_pid(ROLE, &message.consumer_pid)
            .await?
            .is_some()
        {
            warn!(consumer_pid = %message.consumer_pid, "duplicate contract request");
            return Err(NegotiationError::AlreadyExists {
                pid: message.consumer_pid.to_string(),
            });
        }
        self.ensure_offer_valid(&message.offer).await?;

        let original_id = message.offer.id().to_owned();
        let negotiation = ContractNegotiation::new(
            PidPair::new(ProviderPid::generate(), message.consumer_pid),
            ROLE,
            NegotiationState::Requested,
            message.callback_address,
            message.offer.with_original_id(original_id),
        );
        let saved = self.core.persist(&negotiation, None).await?;
        self.after_consumer_proposal(&saved);
        Ok(saved)
    }

    /// Handles a consumer counter-request on an offered negotiation.
    ///
    /// # Errors
    ///
    /// `NotFound` on a pid mismatch, `ValidationFailure` when the offer id or
    /// target left the negotiation's lineage, `InvalidState` outside
    /// `OFFERED`, or `PolicyNotValid`.
    pub async fn handle_contract_request_as_counter_request(
        &self,
        provider_pid: &ProviderPid,
        message: ContractRequestMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self
            .correlated(provider_pid, &message.provider_pid, &message.consumer_pid)
            .await?;

        negotiation.ensure_same_lineage(&message.offer)?;
        negotiation.ensure_transition(NegotiationState::Requested)?;
        self.ensure_offer_valid(&message.offer).await?;

        let previous = negotiation.state();
        negotiation.push_offer(message.offer);
        negotiation.transition_to(NegotiationState::Requested)?;
        let saved = self.core.persist(&negotiation, Some(previous)).await?;
        self.after_consumer_proposal(&saved);
        Ok(saved)
    }

    /// Records that the consumer accepted the current offer.
    ///
    /// # Errors
    ///
    /// `InvalidEventType` unless the event is `ACCEPTED`, `NotFound` on a pid
    /// mismatch, `InvalidState` outside `OFFERED`.
    pub async fn handle_contract_negotiation_event_message_accepted(
        &self,
        provider_pid: &ProviderPid,
        message: ContractNegotiationEventMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        if message.event_type != NegotiationEventType::Accepted {
            return Err(NegotiationError::InvalidEventType {
                expected: NegotiationEventType::Accepted,
                actual: message.event_type,
            });
        }

        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self
            .correlated(provider_pid, &message.provider_pid, &message.consumer_pid)
            .await?;
        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Accepted)?;
        let saved = self.core.persist(&negotiation, Some(previous)).await?;

        if self.core.settings().automatic() {
            self.schedule_agreement(saved.provider_pid());
        }
        Ok(saved)
    }

    /// Records the consumer's verification of the agreement.
    ///
    /// # Errors
    ///
    /// `NotFound` on a pid mismatch, `InvalidState` unless `AGREED`.
    pub async fn handle_contract_agreement_verification_message(
        &self,
        provider_pid: &ProviderPid,
        message: ContractAgreementVerificationMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self
            .correlated(provider_pid, &message.provider_pid, &message.consumer_pid)
            .await?;
        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Verified)?;
        let saved = self.core.persist(&negotiation, Some(previous)).await?;

        if self.core.settings().automatic() {
            self.schedule_finalize(saved.provider_pid());
        }
        Ok(saved)
    }

    /// Terminates on the consumer's request.
    ///
    /// # Errors
    ///
    /// `NotFound` on a pid mismatch, `InvalidState` once terminated or
    /// finalized.
    pub async fn handle_contract_negotiation_termination_message(
        &self,
        provider_pid: &ProviderPid,
        message: ContractNegotiationTerminationMessage,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self
            .correlated(provider_pid, &message.provider_pid, &message.consumer_pid)
            .await?;
        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Terminated)?;
        negotiation.record_termination(Termination {
            code: message.code,
            reason: message.reason,
            terminated_by: Role::Consumer,
        });
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Opens a negotiation by offering `offer` to the consumer at
    /// `consumer_address`.
    ///
    /// # Errors
    ///
    /// `Peer` when the consumer does not acknowledge with a consumer pid.
    pub async fn offer_negotiation(
        &self,
        consumer_address: &str,
        offer: Offer,
    ) -> NegotiationResult<ContractNegotiation> {
        let provider_pid = ProviderPid::generate();
        let _guard = self.core.lock(provider_pid.as_str()).await;

        let message = ProtocolMessage::ContractOffer(ContractOfferMessage {
            provider_pid: provider_pid.clone(),
            consumer_pid: ConsumerPid::blank(),
            offer: offer.clone(),
            callback_address: self.core.settings().callback_address().to_owned(),
        });
        let ack = self.core.send(consumer_address, &message).await?;
        if ack.consumer_pid.is_blank() {
            return Err(PeerError::Protocol("acknowledgement carried no consumerPid".to_owned()).into());
        }

        let original_id = offer.id().to_owned();
        let negotiation = ContractNegotiation::new(
            PidPair::new(provider_pid, ack.consumer_pid),
            ROLE,
            NegotiationState::Offered,
            consumer_address,
            offer.with_original_id(original_id),
        );
        self.core.persist(&negotiation, None).await
    }

    /// Answers a request with a counter-offer.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` outside `REQUESTED`, `ValidationFailure`
    /// when the offer leaves the lineage, or `Peer`.
    pub async fn send_counter_offer(
        &self,
        provider_pid: &ProviderPid,
        offer: Offer,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_provider_pid(provider_pid).await?;
        negotiation.ensure_transition(NegotiationState::Offered)?;
        negotiation.ensure_same_lineage(&offer)?;

        let message = ProtocolMessage::ContractOffer(ContractOfferMessage {
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
        negotiation.transition_to(NegotiationState::Offered)?;
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Issues an agreement over the current offer.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless `REQUESTED` or `ACCEPTED`, or
    /// `Peer`.
    pub async fn send_agreement(
        &self,
        provider_pid: &ProviderPid,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_provider_pid(provider_pid).await?;
        negotiation.ensure_transition(NegotiationState::Agreed)?;

        let agreement = Agreement::from_offer(
            negotiation.current_offer(),
            AgreementId::generate(),
            Utc::now(),
        );
        let message = ProtocolMessage::ContractAgreement(ContractAgreementMessage {
            provider_pid: negotiation.provider_pid().clone(),
            consumer_pid: negotiation.consumer_pid().clone(),
            agreement: agreement.clone(),
            callback_address: self.core.settings().callback_address().to_owned(),
        });
        self.core
            .send(negotiation.callback_address(), &message)
            .await?;

        let previous = negotiation.state();
        info!(
            provider_pid = %negotiation.provider_pid(),
            agreement_id = %agreement.id(),
            "agreement issued"
        );
        negotiation.attach_agreement(agreement);
        negotiation.transition_to(NegotiationState::Agreed)?;
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Finalizes a verified agreement and opens its enforcement record.
    ///
    /// The record is opened before the consumer is told; if the consumer
    /// cannot be reached the record opened here is revoked again and the
    /// negotiation stays `VERIFIED`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless `VERIFIED`, `Policy` when the
    /// enforcement record cannot be created, or `Peer`.
    pub async fn finalize(&self, provider_pid: &ProviderPid) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_provider_pid(provider_pid).await?;
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

        let message = ProtocolMessage::NegotiationEvent(ContractNegotiationEventMessage {
            provider_pid: negotiation.provider_pid().clone(),
            consumer_pid: negotiation.consumer_pid().clone(),
            event_type: NegotiationEventType::Finalized,
        });
        if let Err(err) = self.core.send(negotiation.callback_address(), &message).await {
            if created {
                revoke_enforcement(administration, &agreement_id).await;
            }
            return Err(err);
        }

        let previous = negotiation.state();
        negotiation.transition_to(NegotiationState::Finalized)?;
        self.core.persist(&negotiation, Some(previous)).await
    }

    /// Terminates the negotiation and notifies the consumer.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` once terminated or finalized, or `Peer`.
    pub async fn terminate(
        &self,
        provider_pid: &ProviderPid,
        code: Option<String>,
        reason: Option<String>,
    ) -> NegotiationResult<ContractNegotiation> {
        let _guard = self.core.lock(provider_pid.as_str()).await;
        let mut negotiation = self.negotiation_by_provider_pid(provider_pid).await?;
        negotiation.ensure_transition(NegotiationState::Terminated)?;

        let message = ProtocolMessage::Termination {
            recipient: Role::Consumer,
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
        addressed: &ProviderPid,
        provider_pid: &ProviderPid,
        consumer_pid: &ConsumerPid,
    ) -> NegotiationResult<ContractNegotiation> {
        if provider_pid != addressed {
            return Err(NegotiationError::not_found(addressed));
        }
        self.core
            .find_correlated(ROLE, provider_pid, consumer_pid, addressed.as_str())
            .await
    }

    async fn ensure_offer_valid(&self, offer: &Offer) -> NegotiationResult<()> {
        if self.offer_validator.is_offer_still_valid(offer).await {
            Ok(())
        } else {
            warn!(offer_id = offer.id(), "offer rejected by validation");
            Err(NegotiationError::PolicyNotValid {
                offer_id: offer.id().to_owned(),
            })
        }
    }

    fn after_consumer_proposal(&self, negotiation: &ContractNegotiation) {
        if self.core.settings().automatic() {
            self.schedule_agreement(negotiation.provider_pid());
        } else {
            self.core.request_review(negotiation);
        }
    }

    fn schedule_agreement(&self, provider_pid: &ProviderPid) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let provider_pid = provider_pid.clone();
        self.core.schedule("send_agreement", async move {
            this.send_agreement(&provider_pid).await
        });
    }

    fn schedule_finalize(&self, provider_pid: &ProviderPid) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let provider_pid = provider_pid.clone();
        self.core.schedule("finalize", async move {
            this.finalize(&provider_pid).await
        });
    }
}
