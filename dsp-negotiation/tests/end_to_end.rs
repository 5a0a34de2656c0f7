mod common;

use std::sync::Arc;

use common::{
    CONSUMER_ADDRESS, CountingAdministration, PROVIDER_ADDRESS, catalog, core, eventually, offer,
    offer_with_id, settings,
};
use dsp_negotiation::{
    CollectingPublisher, ConsumerDispatcher, InMemoryNegotiationStore, LoopbackPeer,
    NegotiationError, NegotiationEvent, NegotiationState, PeerError, ProviderDispatcher, Role,
};
use dsp_policy::{EnforcementContext, PolicyEnforcer};

struct Party<D> {
    dispatcher: Arc<D>,
    events: Arc<CollectingPublisher>,
    administration: Arc<CountingAdministration>,
}

fn network(automatic: bool) -> (Party<ProviderDispatcher>, Party<ConsumerDispatcher>) {
    let loopback = Arc::new(LoopbackPeer::new());

    let provider_events = CollectingPublisher::new();
    let provider_administration = CountingAdministration::new();
    let provider = ProviderDispatcher::new(
        core(
            Arc::new(InMemoryNegotiationStore::new()),
            loopback.clone(),
            provider_events.clone(),
            settings(PROVIDER_ADDRESS, automatic),
        ),
        catalog(),
        provider_administration.clone(),
    );

    let consumer_events = CollectingPublisher::new();
    let consumer_administration = CountingAdministration::new();
    let consumer = ConsumerDispatcher::new(
        core(
            Arc::new(InMemoryNegotiationStore::new()),
            loopback.clone(),
            consumer_events.clone(),
            settings(CONSUMER_ADDRESS, automatic),
        ),
        consumer_administration.clone(),
    );

    loopback.register_provider(PROVIDER_ADDRESS, &provider);
    loopback.register_consumer(CONSUMER_ADDRESS, &consumer);

    (
        Party {
            dispatcher: provider,
            events: provider_events,
            administration: provider_administration,
        },
        Party {
            dispatcher: consumer,
            events: consumer_events,
            administration: consumer_administration,
        },
    )
}

fn transfer_requests(events: &CollectingPublisher) -> usize {
    events.count(|event| matches!(event, NegotiationEvent::TransferInitializationRequested { .. }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn automatic_negotiation_reaches_finalized_on_both_sides() {
    let (provider, consumer) = network(true);

    let requested = consumer
        .dispatcher
        .request_negotiation(PROVIDER_ADDRESS, offer())
        .await
        .unwrap();
    let provider_pid = requested.provider_pid().clone();
    let consumer_pid = requested.consumer_pid().clone();

    let finalized = eventually(|| {
        let provider = Arc::clone(&provider.dispatcher);
        let consumer = Arc::clone(&consumer.dispatcher);
        let provider_pid = provider_pid.clone();
        let consumer_pid = consumer_pid.clone();
        async move {
            let provider_state = provider
                .negotiation_by_provider_pid(&provider_pid)
                .await
                .map(|negotiation| negotiation.state());
            let consumer_state = consumer
                .negotiation_by_consumer_pid(&consumer_pid)
                .await
                .map(|negotiation| negotiation.state());
            matches!(
                (provider_state, consumer_state),
                (Ok(NegotiationState::Finalized), Ok(NegotiationState::Finalized))
            )
        }
    })
    .await;
    assert!(finalized);

    let provider_side = provider
        .dispatcher
        .negotiation_by_provider_pid(&provider_pid)
        .await
        .unwrap();
    let consumer_side = consumer
        .dispatcher
        .negotiation_by_consumer_pid(&consumer_pid)
        .await
        .unwrap();
    let agreement_id = provider_side.agreement().unwrap().id().clone();
    assert_eq!(consumer_side.agreement().unwrap().id(), &agreement_id);

    assert_eq!(provider.administration.created(), vec![agreement_id.clone()]);
    assert_eq!(consumer.administration.created(), vec![agreement_id]);
    assert_eq!(transfer_requests(&consumer.events), 1);
    assert_eq!(transfer_requests(&provider.events), 0);
}

#[tokio::test]
async fn manual_negotiation_with_counter_request() {
    let (provider, consumer) = network(false);

    let offered = provider
        .dispatcher
        .offer_negotiation(CONSUMER_ADDRESS, offer())
        .await
        .unwrap();
    let provider_pid = offered.provider_pid().clone();
    let consumer_pid = offered.consumer_pid().clone();
    assert_eq!(
        consumer
            .events
            .count(|event| matches!(event, NegotiationEvent::OfferNeedsReview { .. })),
        1
    );

    let countered = consumer
        .dispatcher
        .send_counter_request(&consumer_pid, offer())
        .await
        .unwrap();
    assert_eq!(countered.state(), NegotiationState::Requested);
    assert_eq!(
        provider
            .dispatcher
            .negotiation_by_provider_pid(&provider_pid)
            .await
            .unwrap()
            .state(),
        NegotiationState::Requested
    );

    provider.dispatcher.send_agreement(&provider_pid).await.unwrap();
    assert_eq!(
        consumer
            .dispatcher
            .negotiation_by_consumer_pid(&consumer_pid)
            .await
            .unwrap()
            .state(),
        NegotiationState::Agreed
    );

    consumer.dispatcher.verify_agreement(&consumer_pid).await.unwrap();
    let finalized = provider.dispatcher.finalize(&provider_pid).await.unwrap();
    assert_eq!(finalized.state(), NegotiationState::Finalized);

    let consumer_side = consumer
        .dispatcher
        .negotiation_by_consumer_pid(&consumer_pid)
        .await
        .unwrap();
    assert_eq!(consumer_side.state(), NegotiationState::Finalized);
    assert_eq!(transfer_requests(&consumer.events), 1);

    let agreement = consumer_side.agreement().unwrap().clone();
    let counter = consumer.administration.counter();
    counter.record_access(agreement.id()).unwrap();
    let enforcer = PolicyEnforcer::with_default_handlers(counter.clone());
    let decision = enforcer
        .enforce_policy(&agreement, &EnforcementContext::new(agreement.id().clone()))
        .await;
    assert!(decision.is_allowed(), "{}", decision.message());
}

#[tokio::test]
async fn termination_reaches_the_provider() {
    let (provider, consumer) = network(false);
    let requested = consumer
        .dispatcher
        .request_negotiation(PROVIDER_ADDRESS, offer())
        .await
        .unwrap();

    let terminated = consumer
        .dispatcher
        .terminate(requested.consumer_pid(), Some("cancelled".to_owned()), None)
        .await
        .unwrap();
    assert_eq!(terminated.state(), NegotiationState::Terminated);

    let provider_side = provider
        .dispatcher
        .negotiation_by_provider_pid(requested.provider_pid())
        .await
        .unwrap();
    assert_eq!(provider_side.state(), NegotiationState::Terminated);
    assert_eq!(provider_side.termination().unwrap().terminated_by, Role::Consumer);
}

#[tokio::test]
async fn provider_rejection_is_not_committed_by_consumer() {
    let (_provider, consumer) = network(false);

    let err = consumer
        .dispatcher
        .request_negotiation(PROVIDER_ADDRESS, offer_with_id("urn:offer:unpublished"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NegotiationError::Peer(PeerError::Rejected { status: 400, .. })
    ));
    assert!(consumer.events.events().is_empty());
}

#[tokio::test]
async fn unknown_address_is_rejected() {
    let (_provider, consumer) = network(false);

    let err = consumer
        .dispatcher
        .request_negotiation("https://nowhere.example/dsp", offer())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NegotiationError::Peer(PeerError::Rejected { status: 404, .. })
    ));
}
