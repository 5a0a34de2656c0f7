#![allow(dead_code)]

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dsp_negotiation::{
    CollectingPublisher, ContractNegotiation, InMemoryNegotiationStore, NegotiationAck,
    NegotiationCore, NegotiationSettings, NegotiationState, NegotiationStore, PeerError,
    PeerResult, ProtocolMessage, RemotePeer, RetryConfig, StoreError, StoreResult,
};
use dsp_policy::{
    Action, CatalogOfferValidator, Constraint, InMemoryAccessCounter,
    InMemoryPolicyAdministration, LeftOperand, Offer, Operator, Permission, PolicyAdministration,
    PolicyResult,
};
use dsp_primitives::{AgreementId, ConsumerPid, ProviderPid};

pub const PROVIDER_ADDRESS: &str = "https://provider.example/dsp";
pub const CONSUMER_ADDRESS: &str = "https://consumer.example/dsp";
pub const REMOTE_PROVIDER_PID: &str = "urn:uuid:p-remote";
pub const REMOTE_CONSUMER_PID: &str = "urn:uuid:c-remote";

pub fn offer() -> Offer {
    offer_with_id("urn:offer:1")
}

pub fn offer_with_id(id: &str) -> Offer {
    Offer::new(id, "urn:asset:1", "urn:participant:provider", "urn:participant:consumer")
        .with_permission(
            Permission::new(Action::Use)
                .with_constraint(Constraint::new(LeftOperand::Count, Operator::Lteq, "5")),
        )
}

pub fn catalog() -> Arc<CatalogOfferValidator> {
    let catalog = CatalogOfferValidator::new();
    catalog.publish(offer());
    Arc::new(catalog)
}

pub fn retry() -> RetryConfig {
    RetryConfig::new(
        NonZeroU32::MIN,
        Duration::from_millis(1),
        Duration::from_millis(2),
    )
}

pub fn settings(callback_address: &str, automatic: bool) -> NegotiationSettings {
    NegotiationSettings::new(callback_address)
        .with_automatic(automatic)
        .with_retry(retry())
}

pub fn core(
    store: Arc<dyn NegotiationStore>,
    peer: Arc<dyn RemotePeer>,
    events: Arc<CollectingPublisher>,
    settings: NegotiationSettings,
) -> NegotiationCore {
    NegotiationCore::new(store, peer, settings).with_events(events)
}

fn pids_of(message: &ProtocolMessage) -> (ProviderPid, ConsumerPid) {
    match message {
        ProtocolMessage::ContractRequest(m) => (m.provider_pid.clone(), m.consumer_pid.clone()),
        ProtocolMessage::ContractOffer(m) => (m.provider_pid.clone(), m.consumer_pid.clone()),
        ProtocolMessage::ContractAgreement(m) => (m.provider_pid.clone(), m.consumer_pid.clone()),
        ProtocolMessage::AgreementVerification(m) => {
            (m.provider_pid.clone(), m.consumer_pid.clone())
        }
        ProtocolMessage::NegotiationEvent(m) => (m.provider_pid.clone(), m.consumer_pid.clone()),
        ProtocolMessage::Termination { message, .. } => {
            (message.provider_pid.clone(), message.consumer_pid.clone())
        }
    }
}

/// Acknowledges everything, filling blank pids with fixed remote ones.
#[derive(Default)]
pub struct RecordingPeer {
    sent: Mutex<Vec<ProtocolMessage>>,
    failure: Option<PeerError>,
    failing_kind: Option<&'static str>,
}

impl RecordingPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failure: PeerError) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(failure),
            failing_kind: None,
        })
    }

    /// Fails only messages of the given kind.
    pub fn failing_on(kind: &'static str, failure: PeerError) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(failure),
            failing_kind: Some(kind),
        })
    }

    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(ProtocolMessage::kind).collect()
    }
}

#[async_trait]
impl RemotePeer for RecordingPeer {
    async fn send(&self, _address: &str, message: &ProtocolMessage) -> PeerResult<NegotiationAck> {
        self.sent.lock().unwrap().push(message.clone());
        if let Some(failure) = &self.failure {
            if self.failing_kind.is_none_or(|kind| kind == message.kind()) {
                return Err(failure.clone());
            }
        }
        let (mut provider_pid, mut consumer_pid) = pids_of(message);
        if provider_pid.is_blank() {
            provider_pid = ProviderPid::from(REMOTE_PROVIDER_PID);
        }
        if consumer_pid.is_blank() {
            consumer_pid = ConsumerPid::from(REMOTE_CONSUMER_PID);
        }
        Ok(NegotiationAck {
            provider_pid,
            consumer_pid,
            state: NegotiationState::Requested,
        })
    }
}

/// Store wrapper counting successful writes.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryNegotiationStore,
    saves: AtomicUsize,
    refused: Option<NegotiationState>,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails every write that would store a negotiation in `state`.
    pub fn refusing(state: NegotiationState) -> Arc<Self> {
        Arc::new(Self {
            refused: Some(state),
            ..Self::default()
        })
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NegotiationStore for CountingStore {
    async fn find_by_provider_pid_and_consumer_pid(
        &self,
        provider_pid: &ProviderPid,
        consumer_pid: &ConsumerPid,
    ) -> StoreResult<Option<ContractNegotiation>> {
        self.inner
            .find_by_provider_pid_and_consumer_pid(provider_pid, consumer_pid)
            .await
    }

    async fn find_by_provider_pid(
        &self,
        provider_pid: &ProviderPid,
    ) -> StoreResult<Option<ContractNegotiation>> {
        self.inner.find_by_provider_pid(provider_pid).await
    }

    async fn find_by_consumer_pid(
        &self,
        consumer_pid: &ConsumerPid,
    ) -> StoreResult<Option<ContractNegotiation>> {
        self.inner.find_by_consumer_pid(consumer_pid).await
    }

    async fn save(&self, negotiation: &ContractNegotiation) -> StoreResult<ContractNegotiation> {
        if self.refused == Some(negotiation.state()) {
            return Err(StoreError::backend("disk full"));
        }
        let saved = self.inner.save(negotiation).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(saved)
    }
}

/// Policy administration tracking which records currently exist.
pub struct CountingAdministration {
    inner: InMemoryPolicyAdministration,
    created: Mutex<Vec<AgreementId>>,
}

impl CountingAdministration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryPolicyAdministration::new(Arc::new(InMemoryAccessCounter::new())),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> Vec<AgreementId> {
        self.created.lock().unwrap().clone()
    }

    pub fn counter(&self) -> &Arc<InMemoryAccessCounter> {
        self.inner.counter()
    }
}

#[async_trait]
impl PolicyAdministration for CountingAdministration {
    async fn create_enforcement(&self, agreement_id: &AgreementId) -> PolicyResult<()> {
        self.inner.create_enforcement(agreement_id).await?;
        self.created.lock().unwrap().push(agreement_id.clone());
        Ok(())
    }

    async fn revoke_enforcement(&self, agreement_id: &AgreementId) -> PolicyResult<()> {
        self.inner.revoke_enforcement(agreement_id).await?;
        self.created.lock().unwrap().retain(|created| created != agreement_id);
        Ok(())
    }
}

/// Polls until `check` holds or two seconds have passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
