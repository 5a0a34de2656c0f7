//! The contract negotiation aggregate.

use chrono::{DateTime, Utc};
use dsp_policy::{Agreement, Offer};
use dsp_primitives::{ConsumerPid, PidPair, ProviderPid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NegotiationError, NegotiationResult};
use crate::state::{NegotiationState, Role, is_transition_allowed};

/// Why and by which code a negotiation was terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Termination {
    /// Machine readable code.
    pub code: Option<String>,
    /// Human readable reason.
    pub reason: Option<String>,
    /// Role of the party that terminated.
    pub terminated_by: Role,
}

/// One negotiation as seen by the local party.
///
/// Each round supersedes the current offer; earlier rounds are kept in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractNegotiation {
    provider_pid: ProviderPid,
    consumer_pid: ConsumerPid,
    role: Role,
    state: NegotiationState,
    callback_address: String,
    offer: Offer,
    #[serde(default)]
    previous_offers: Vec<Offer>,
    agreement: Option<Agreement>,
    termination: Option<Termination>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    version: u64,
}

impl ContractNegotiation {
    /// Starts a negotiation in `state` with its first offer.
    #[must_use]
    pub fn new(
        pids: PidPair,
        role: Role,
        state: NegotiationState,
        callback_address: impl Into<String>,
        offer: Offer,
    ) -> Self {
        let now = Utc::now();
        Self {
            provider_pid: pids.provider_pid().clone(),
            consumer_pid: pids.consumer_pid().clone(),
            role,
            state,
            callback_address: callback_address.into(),
            offer,
            previous_offers: Vec::new(),
            agreement: None,
            termination: None,
            created_at: now,
            modified_at: now,
            version: 0,
        }
    }

    /// Returns the provider pid.
    #[must_use]
    pub fn provider_pid(&self) -> &ProviderPid {
        &self.provider_pid
    }

    /// Returns the consumer pid.
    #[must_use]
    pub fn consumer_pid(&self) -> &ConsumerPid {
        &self.consumer_pid
    }

    /// Returns both pids.
    #[must_use]
    pub fn pids(&self) -> PidPair {
        PidPair::new(self.provider_pid.clone(), self.consumer_pid.clone())
    }

    /// Returns the local party's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Returns the counterparty's callback address.
    #[must_use]
    pub fn callback_address(&self) -> &str {
        &self.callback_address
    }

    /// Returns the offer of the latest round.
    #[must_use]
    pub fn current_offer(&self) -> &Offer {
        &self.offer
    }

    /// Returns every offer in round order, the current one last.
    pub fn offers(&self) -> impl Iterator<Item = &Offer> {
        self.previous_offers.iter().chain(std::iter::once(&self.offer))
    }

    /// Returns the agreement once reached.
    #[must_use]
    pub fn agreement(&self) -> Option<&Agreement> {
        self.agreement.as_ref()
    }

    /// Returns the termination record, if terminated.
    #[must_use]
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Returns when the negotiation was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the negotiation last changed.
    #[must_use]
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Returns the persisted version this copy was read at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` when both pids equal the stored ones.
    #[must_use]
    pub fn is_correlated(&self, provider_pid: &ProviderPid, consumer_pid: &ConsumerPid) -> bool {
        &self.provider_pid == provider_pid && &self.consumer_pid == consumer_pid
    }

    /// Checks that the negotiation may move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidState`] when the transition table
    /// does not allow the move.
    pub fn ensure_transition(&self, next: NegotiationState) -> NegotiationResult<()> {
        if is_transition_allowed(self.state, next) {
            Ok(())
        } else {
            Err(NegotiationError::InvalidState {
                from: self.state,
                to: next,
            })
        }
    }

    /// Checks that `offer` keeps the id and target of the negotiation's lineage.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::ValidationFailure`] on any mismatch.
    pub fn ensure_same_lineage(&self, offer: &Offer) -> NegotiationResult<()> {
        let current = self.current_offer();
        let original_id = current.original_id().unwrap_or(current.id());
        if offer.id() != original_id {
            return Err(NegotiationError::validation(format!(
                "offer id {} does not match {original_id}",
                offer.id()
            )));
        }
        if offer.target() != current.target() {
            return Err(NegotiationError::validation(format!(
                "offer target {} does not match {}",
                offer.target(),
                current.target()
            )));
        }
        Ok(())
    }

    /// Returns `true` when some round's offer covers the agreement's target
    /// and parties.
    #[must_use]
    pub fn has_offer_for(&self, agreement: &Agreement) -> bool {
        self.offers().any(|offer| {
            offer.covers(agreement.target(), agreement.assigner(), agreement.assignee())
        })
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidState`] when not allowed.
    pub fn transition_to(&mut self, next: NegotiationState) -> NegotiationResult<()> {
        self.ensure_transition(next)?;
        debug!(
            provider_pid = %self.provider_pid,
            consumer_pid = %self.consumer_pid,
            role = %self.role,
            from = %self.state,
            to = %next,
            "contract negotiation transition"
        );
        self.state = next;
        self.modified_at = Utc::now();
        Ok(())
    }

    /// Appends a new round's offer, keeping the lineage back-reference.
    pub fn push_offer(&mut self, offer: Offer) {
        let original_id = self
            .offer
            .original_id()
            .unwrap_or(self.offer.id())
            .to_owned();
        let previous = std::mem::replace(&mut self.offer, offer.with_original_id(original_id));
        self.previous_offers.push(previous);
    }

    /// Attaches the agreement reached in this negotiation.
    pub fn attach_agreement(&mut self, agreement: Agreement) {
        self.agreement = Some(agreement);
    }

    /// Records the termination details.
    pub fn record_termination(&mut self, termination: Termination) {
        self.termination = Some(termination);
    }

    /// Stamps the version a store persisted this copy at.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
