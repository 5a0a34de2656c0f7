//! In-process transport wiring dispatchers together without a network.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use tracing::debug;

use crate::consumer::ConsumerDispatcher;
use crate::error::NegotiationResult;
use crate::messages::{NegotiationAck, ProtocolMessage};
use crate::negotiation::ContractNegotiation;
use crate::peer::{PeerError, PeerResult, RemotePeer};
use crate::provider::ProviderDispatcher;

#[derive(Clone)]
enum Route {
    Provider(Weak<ProviderDispatcher>),
    Consumer(Weak<ConsumerDispatcher>),
}

/// [`RemotePeer`] that hands messages straight to registered dispatchers.
///
/// Messages are routed by callback address and by the same path rules an
/// HTTP endpoint would apply. Handler errors come back with the status code
/// they would carry on the wire, so retry and rejection behave alike.
#[derive(Default)]
pub struct LoopbackPeer {
    routes: RwLock<HashMap<String, Route>>,
}

impl std::fmt::Debug for LoopbackPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("LoopbackPeer")
            .field("addresses", &routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LoopbackPeer {
    /// Creates a transport without routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers messages addressed to `address` to the provider.
    pub fn register_provider(&self, address: impl Into<String>, provider: &Arc<ProviderDispatcher>) {
        self.insert(address.into(), Route::Provider(Arc::downgrade(provider)));
    }

    /// Delivers messages addressed to `address` to the consumer.
    pub fn register_consumer(&self, address: impl Into<String>, consumer: &Arc<ConsumerDispatcher>) {
        self.insert(address.into(), Route::Consumer(Arc::downgrade(consumer)));
    }

    fn insert(&self, address: String, route: Route) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, route);
    }

    fn route(&self, address: &str) -> PeerResult<Route> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| PeerError::from_status(404, format!("no endpoint at {address}")))
    }
}

fn upgrade<T>(dispatcher: &Weak<T>, address: &str) -> PeerResult<Arc<T>> {
    dispatcher
        .upgrade()
        .ok_or_else(|| PeerError::transient(format!("endpoint at {address} is gone")))
}

async fn deliver_to_provider(
    provider: &ProviderDispatcher,
    message: ProtocolMessage,
) -> Option<NegotiationResult<ContractNegotiation>> {
    let outcome = match message {
        ProtocolMessage::ContractRequest(message) if message.provider_pid.is_blank() => {
            provider.handle_contract_request_message(message).await
        }
        ProtocolMessage::ContractRequest(message) => {
            let provider_pid = message.provider_pid.clone();
            provider
                .handle_contract_request_as_counter_request(&provider_pid, message)
                .await
        }
        ProtocolMessage::NegotiationEvent(message) => {
            let provider_pid = message.provider_pid.clone();
            provider
                .handle_contract_negotiation_event_message_accepted(&provider_pid, message)
                .await
        }
        ProtocolMessage::AgreementVerification(message) => {
            let provider_pid = message.provider_pid.clone();
            provider
                .handle_contract_agreement_verification_message(&provider_pid, message)
                .await
        }
        ProtocolMessage::Termination { message, .. } => {
            let provider_pid = message.provider_pid.clone();
            provider
                .handle_contract_negotiation_termination_message(&provider_pid, message)
                .await
        }
        ProtocolMessage::ContractOffer(_) | ProtocolMessage::ContractAgreement(_) => return None,
    };
    Some(outcome)
}

async fn deliver_to_consumer(
    consumer: &ConsumerDispatcher,
    message: ProtocolMessage,
) -> Option<NegotiationResult<ContractNegotiation>> {
    let outcome = match message {
        ProtocolMessage::ContractOffer(message) if message.consumer_pid.is_blank() => {
            consumer.handle_contract_offer_message(message).await
        }
        ProtocolMessage::ContractOffer(message) => {
            let consumer_pid = message.consumer_pid.clone();
            consumer
                .handle_contract_offer_message_as_counteroffer(&consumer_pid, message)
                .await
        }
        ProtocolMessage::ContractAgreement(message) => {
            let consumer_pid = message.consumer_pid.clone();
            consumer
                .handle_contract_agreement_message(&consumer_pid, message)
                .await
        }
        ProtocolMessage::NegotiationEvent(message) => {
            let consumer_pid = message.consumer_pid.clone();
            consumer
                .handle_contract_negotiation_event_message_finalize(&consumer_pid, message)
                .await
        }
        ProtocolMessage::Termination { message, .. } => {
            let consumer_pid = message.consumer_pid.clone();
            consumer
                .handle_contract_negotiation_termination_message(&consumer_pid, message)
                .await
        }
        ProtocolMessage::ContractRequest(_) | ProtocolMessage::AgreementVerification(_) => {
            return None;
        }
    };
    Some(outcome)
}

#[async_trait]
impl RemotePeer for LoopbackPeer {
    async fn send(&self, address: &str, message: &ProtocolMessage) -> PeerResult<NegotiationAck> {
        debug!(address, message = message.kind(), "loopback delivery");
        let outcome = match self.route(address)? {
            Route::Provider(provider) => {
                let provider = upgrade(&provider, address)?;
                deliver_to_provider(&provider, message.clone()).await
            }
            Route::Consumer(consumer) => {
                let consumer = upgrade(&consumer, address)?;
                deliver_to_consumer(&consumer, message.clone()).await
            }
        };

        match outcome {
            Some(Ok(negotiation)) => Ok(NegotiationAck::from(&negotiation)),
            Some(Err(err)) => Err(PeerError::from_status(err.status_code(), err.to_string())),
            None => Err(PeerError::from_status(
                404,
                format!("no {} endpoint at {address}", message.kind()),
            )),
        }
    }
}
