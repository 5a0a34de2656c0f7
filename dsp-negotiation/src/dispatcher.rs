//! Plumbing shared by the provider and consumer dispatchers.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dsp_config::ConnectorConfig;
use dsp_policy::{PolicyAdministration, PolicyError};
use dsp_primitives::{AgreementId, ConsumerPid, ProviderPid};
use tracing::{debug, error, info, warn};

use crate::error::{NegotiationError, NegotiationResult};
use crate::events::{EventPublisher, NegotiationEvent, TracingEventPublisher};
use crate::locks::{AggregateGuard, AggregateLocks};
use crate::messages::{NegotiationAck, ProtocolMessage};
use crate::negotiation::ContractNegotiation;
use crate::peer::{PeerError, RemotePeer, RetryConfig, send_with_retry};
use crate::scheduler::StepScheduler;
use crate::state::{NegotiationState, Role};
use crate::store::NegotiationStore;

/// Runtime settings shared by both dispatchers.
#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    callback_address: String,
    automatic: bool,
    retry: RetryConfig,
}

impl NegotiationSettings {
    /// Creates settings for a connector reachable at `callback_address`,
    /// with manual review and the default retry policy.
    #[must_use]
    pub fn new(callback_address: impl Into<String>) -> Self {
        Self {
            callback_address: callback_address.into(),
            automatic: false,
            retry: RetryConfig::default(),
        }
    }

    /// Enables or disables automatic advancement.
    #[must_use]
    pub fn with_automatic(mut self, automatic: bool) -> Self {
        self.automatic = automatic;
        self
    }

    /// Overrides the outbound retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the local callback address advertised to counterparties.
    #[must_use]
    pub fn callback_address(&self) -> &str {
        &self.callback_address
    }

    /// Returns `true` when negotiations advance without operator review.
    #[must_use]
    pub fn automatic(&self) -> bool {
        self.automatic
    }

    /// Returns the outbound retry policy.
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        self.retry
    }
}

impl TryFrom<&ConnectorConfig> for NegotiationSettings {
    type Error = PeerError;

    fn try_from(config: &ConnectorConfig) -> Result<Self, PeerError> {
        Ok(Self::new(config.negotiation.callback_address.clone())
            .with_automatic(config.negotiation.automatic)
            .with_retry(RetryConfig::try_from(&config.outbound)?))
    }
}

/// Store, transport, events, locks, and scheduler one dispatcher works with.
pub struct NegotiationCore {
    store: Arc<dyn NegotiationStore>,
    peer: Arc<dyn RemotePeer>,
    events: Arc<dyn EventPublisher>,
    locks: AggregateLocks,
    scheduler: StepScheduler,
    settings: NegotiationSettings,
}

impl fmt::Debug for NegotiationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationCore")
            .field("store", &"dyn NegotiationStore")
            .field("peer", &"dyn RemotePeer")
            .field("locks", &self.locks)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl NegotiationCore {
    /// Creates a core that logs events through `tracing`.
    #[must_use]
    pub fn new(
        store: Arc<dyn NegotiationStore>,
        peer: Arc<dyn RemotePeer>,
        settings: NegotiationSettings,
    ) -> Self {
        Self {
            store,
            peer,
            events: Arc::new(TracingEventPublisher),
            locks: AggregateLocks::new(),
            scheduler: StepScheduler::default(),
            settings,
        }
    }

    /// Replaces the event publisher.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the scheduler running automatic steps.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: StepScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &NegotiationSettings {
        &self.settings
    }

    /// Returns the scheduler running automatic steps.
    #[must_use]
    pub fn scheduler(&self) -> &StepScheduler {
        &self.scheduler
    }

    pub(crate) async fn lock(&self, key: impl Into<String>) -> AggregateGuard {
        self.locks.acquire(key).await
    }

    /// Loads the negotiation matching both pids, owned by `role`.
    ///
    /// Anything else is reported as not found for `addressed`.
    pub(crate) async fn find_correlated(
        &self,
        role: Role,
        provider_pid: &ProviderPid,
        consumer_pid: &ConsumerPid,
        addressed: &str,
    ) -> NegotiationResult<ContractNegotiation> {
        self.store
            .find_by_provider_pid_and_consumer_pid(provider_pid, consumer_pid)
            .await?
            .filter(|negotiation| negotiation.role() == role)
            .ok_or_else(|| NegotiationError::not_found(addressed))
    }

    pub(crate) async fn find_by_provider_pid(
        &self,
        role: Role,
        provider_pid: &ProviderPid,
    ) -> NegotiationResult<Option<ContractNegotiation>> {
        Ok(self
            .store
            .find_by_provider_pid(provider_pid)
            .await?
            .filter(|negotiation| negotiation.role() == role))
    }

    pub(crate) async fn find_by_consumer_pid(
        &self,
        role: Role,
        consumer_pid: &ConsumerPid,
    ) -> NegotiationResult<Option<ContractNegotiation>> {
        Ok(self
            .store
            .find_by_consumer_pid(consumer_pid)
            .await?
            .filter(|negotiation| negotiation.role() == role))
    }

    /// Delivers a message with the configured retry policy.
    pub(crate) async fn send(
        &self,
        address: &str,
        message: &ProtocolMessage,
    ) -> NegotiationResult<NegotiationAck> {
        Ok(send_with_retry(self.peer.as_ref(), address, message, self.settings.retry).await?)
    }

    /// Saves the negotiation and announces the state change.
    pub(crate) async fn persist(
        &self,
        negotiation: &ContractNegotiation,
        previous: Option<NegotiationState>,
    ) -> NegotiationResult<ContractNegotiation> {
        let saved = self.store.save(negotiation).await?;
        info!(
            provider_pid = %saved.provider_pid(),
            consumer_pid = %saved.consumer_pid(),
            role = %saved.role(),
            state = %saved.state(),
            version = saved.version(),
            "contract negotiation saved"
        );
        if previous != Some(saved.state()) {
            self.publish(NegotiationEvent::StateChanged {
                pids: saved.pids(),
                role: saved.role(),
                from: previous,
                to: saved.state(),
            });
        }
        Ok(saved)
    }

    pub(crate) fn publish(&self, event: NegotiationEvent) {
        self.events.publish(event);
    }

    /// Asks for operator review of the negotiation's current offer.
    pub(crate) fn request_review(&self, negotiation: &ContractNegotiation) {
        self.publish(NegotiationEvent::OfferNeedsReview {
            pids: negotiation.pids(),
            role: negotiation.role(),
            offer_id: negotiation.current_offer().id().to_owned(),
        });
    }

    /// Runs an automatic step in the background; failures are logged.
    pub(crate) fn schedule<F>(&self, step: &'static str, future: F)
    where
        F: Future<Output = NegotiationResult<ContractNegotiation>> + Send + 'static,
    {
        let spawned = self.scheduler.submit(step, async move {
            if let Err(err) = future.await {
                warn!(step, %err, "automatic negotiation step failed");
            }
        });
        if let Err(err) = spawned {
            warn!(step, %err, "automatic negotiation step not scheduled");
        }
    }
}

/// Opens the enforcement record for a finalized agreement.
///
/// Returns `true` when this call created the record. A record that already
/// exists counts as success so a retried finalize does not fail on its own
/// earlier attempt.
pub(crate) async fn create_enforcement(
    administration: &dyn PolicyAdministration,
    agreement_id: &AgreementId,
) -> NegotiationResult<bool> {
    match administration.create_enforcement(agreement_id).await {
        Ok(()) => {
            info!(agreement_id = %agreement_id, "enforcement record created");
            Ok(true)
        }
        Err(PolicyError::EnforcementRecordExists(_)) => {
            debug!(agreement_id = %agreement_id, "enforcement record already present");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

/// Removes a record opened for a finalize that did not complete.
///
/// Failures are logged; the caller reports the error that aborted the
/// finalize.
pub(crate) async fn revoke_enforcement(
    administration: &dyn PolicyAdministration,
    agreement_id: &AgreementId,
) {
    match administration.revoke_enforcement(agreement_id).await {
        Ok(()) => warn!(agreement_id = %agreement_id, "enforcement record revoked"),
        Err(err) => error!(
            agreement_id = %agreement_id,
            %err,
            "enforcement record of unfinished finalize could not be revoked"
        ),
    }
}
