mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{
    CONSUMER_ADDRESS, CountingAdministration, CountingStore, PROVIDER_ADDRESS,
    REMOTE_PROVIDER_PID, RecordingPeer, core, eventually, offer, offer_with_id, settings,
};
use dsp_negotiation::{
    CollectingPublisher, ConsumerDispatcher, ContractAgreementMessage, ContractNegotiation,
    ContractNegotiationEventMessage, ContractOfferMessage, NegotiationError, NegotiationEvent,
    NegotiationEventType, NegotiationState, PeerError, Role,
};
use dsp_policy::{Agreement, Offer};
use dsp_primitives::{AgreementId, ConsumerPid, ProviderPid};

struct Fixture {
    consumer: Arc<ConsumerDispatcher>,
    store: Arc<CountingStore>,
    peer: Arc<RecordingPeer>,
    events: Arc<CollectingPublisher>,
    administration: Arc<CountingAdministration>,
}

fn fixture_with(peer: Arc<RecordingPeer>, automatic: bool) -> Fixture {
    fixture_with_store(CountingStore::new(), peer, automatic)
}

fn fixture_with_store(
    store: Arc<CountingStore>,
    peer: Arc<RecordingPeer>,
    automatic: bool,
) -> Fixture {
    let events = CollectingPublisher::new();
    let administration = CountingAdministration::new();
    let consumer = ConsumerDispatcher::new(
        core(
            store.clone(),
            peer.clone(),
            events.clone(),
            settings(CONSUMER_ADDRESS, automatic),
        ),
        administration.clone(),
    );
    Fixture {
        consumer,
        store,
        peer,
        events,
        administration,
    }
}

fn fixture() -> Fixture {
    fixture_with(RecordingPeer::new(), false)
}

fn initial_offer(provider_pid: &str) -> ContractOfferMessage {
    ContractOfferMessage {
        provider_pid: ProviderPid::from(provider_pid),
        consumer_pid: ConsumerPid::blank(),
        offer: offer(),
        callback_address: PROVIDER_ADDRESS.to_owned(),
    }
}

fn counter_offer(negotiation: &ContractNegotiation, offer: Offer) -> ContractOfferMessage {
    ContractOfferMessage {
        provider_pid: negotiation.provider_pid().clone(),
        consumer_pid: negotiation.consumer_pid().clone(),
        offer,
        callback_address: PROVIDER_ADDRESS.to_owned(),
    }
}

fn agreement_message(negotiation: &ContractNegotiation, offer: &Offer) -> ContractAgreementMessage {
    ContractAgreementMessage {
        provider_pid: negotiation.provider_pid().clone(),
        consumer_pid: negotiation.consumer_pid().clone(),
        agreement: Agreement::from_offer(offer, AgreementId::generate(), Utc::now()),
        callback_address: PROVIDER_ADDRESS.to_owned(),
    }
}

fn finalized_event(negotiation: &ContractNegotiation) -> ContractNegotiationEventMessage {
    ContractNegotiationEventMessage {
        provider_pid: negotiation.provider_pid().clone(),
        consumer_pid: negotiation.consumer_pid().clone(),
        event_type: NegotiationEventType::Finalized,
    }
}

async fn requested(fixture: &Fixture) -> ContractNegotiation {
    fixture
        .consumer
        .request_negotiation(PROVIDER_ADDRESS, offer())
        .await
        .unwrap()
}

#[tokio::test]
async fn initial_offer_creates_offered_negotiation() {
    let fixture = fixture();

    let negotiation = fixture
        .consumer
        .handle_contract_offer_message(initial_offer("urn:uuid:p1"))
        .await
        .unwrap();

    assert_eq!(negotiation.state(), NegotiationState::Offered);
    assert_eq!(negotiation.role(), Role::Consumer);
    assert_eq!(negotiation.provider_pid().as_str(), "urn:uuid:p1");
    assert!(!negotiation.consumer_pid().is_blank());
    assert_eq!(negotiation.callback_address(), PROVIDER_ADDRESS);
    assert_eq!(
        fixture
            .events
            .count(|event| matches!(event, NegotiationEvent::OfferNeedsReview { role: Role::Consumer, .. })),
        1
    );
}

#[tokio::test]
async fn initial_offer_with_consumer_pid_is_rejected() {
    let fixture = fixture();
    let mut message = initial_offer("urn:uuid:p1");
    message.consumer_pid = ConsumerPid::from("urn:uuid:c1");

    let err = fixture
        .consumer
        .handle_contract_offer_message(message)
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::ConsumerPidNotBlank(_)));
    assert_eq!(fixture.store.saves(), 0);
}

#[tokio::test]
async fn replayed_offer_is_rejected() {
    let fixture = fixture();
    fixture
        .consumer
        .handle_contract_offer_message(initial_offer("urn:uuid:p1"))
        .await
        .unwrap();

    let err = fixture
        .consumer
        .handle_contract_offer_message(initial_offer("urn:uuid:p1"))
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::AlreadyExists { pid } if pid == "urn:uuid:p1"));
    assert_eq!(fixture.store.saves(), 1);
}

#[tokio::test]
async fn consumer_walks_to_finalized() {
    let fixture = fixture();
    let requested = requested(&fixture).await;
    assert_eq!(requested.state(), NegotiationState::Requested);
    assert_eq!(requested.provider_pid().as_str(), REMOTE_PROVIDER_PID);
    let consumer_pid = requested.consumer_pid().clone();

    let offered = fixture
        .consumer
        .handle_contract_offer_message_as_counteroffer(
            &consumer_pid,
            counter_offer(&requested, offer()),
        )
        .await
        .unwrap();
    assert_eq!(offered.state(), NegotiationState::Offered);

    let accepted = fixture.consumer.accept_offer(&consumer_pid).await.unwrap();
    assert_eq!(accepted.state(), NegotiationState::Accepted);

    let message = agreement_message(&accepted, &offer());
    let agreement_id = message.agreement.id().clone();
    let agreed = fixture
        .consumer
        .handle_contract_agreement_message(&consumer_pid, message)
        .await
        .unwrap();
    assert_eq!(agreed.state(), NegotiationState::Agreed);

    let verified = fixture.consumer.verify_agreement(&consumer_pid).await.unwrap();
    assert_eq!(verified.state(), NegotiationState::Verified);

    let finalized = fixture
        .consumer
        .handle_contract_negotiation_event_message_finalize(&consumer_pid, finalized_event(&verified))
        .await
        .unwrap();
    assert_eq!(finalized.state(), NegotiationState::Finalized);
    assert_eq!(fixture.administration.created(), vec![agreement_id.clone()]);
    assert_eq!(
        fixture.events.count(|event| matches!(
            event,
            NegotiationEvent::TransferInitializationRequested { agreement_id: id, .. } if *id == agreement_id
        )),
        1
    );
    assert_eq!(
        fixture.peer.kinds(),
        vec![
            "ContractRequestMessage",
            "ContractNegotiationEventMessage",
            "ContractAgreementVerificationMessage",
        ]
    );
}

#[tokio::test]
async fn agreement_for_unknown_target_is_rejected() {
    let fixture = fixture();
    let requested = requested(&fixture).await;
    let other = Offer::new(
        "urn:offer:1",
        "urn:asset:other",
        "urn:participant:provider",
        "urn:participant:consumer",
    );

    let err = fixture
        .consumer
        .handle_contract_agreement_message(
            requested.consumer_pid(),
            agreement_message(&requested, &other),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::OfferNotFound { target } if target == "urn:asset:other"));
    assert_eq!(fixture.store.saves(), 1);
}

#[tokio::test]
async fn counteroffer_outside_lineage_fails_validation() {
    let fixture = fixture();
    let requested = requested(&fixture).await;

    let err = fixture
        .consumer
        .handle_contract_offer_message_as_counteroffer(
            requested.consumer_pid(),
            counter_offer(&requested, offer_with_id("urn:offer:2")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::ValidationFailure(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(fixture.store.saves(), 1);
}

#[tokio::test]
async fn counteroffer_on_other_path_is_not_found() {
    let fixture = fixture();
    let requested = requested(&fixture).await;

    let err = fixture
        .consumer
        .handle_contract_offer_message_as_counteroffer(
            &ConsumerPid::from("urn:uuid:elsewhere"),
            counter_offer(&requested, offer()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::NotFound { .. }));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn finalize_before_verification_is_rejected() {
    let fixture = fixture();
    let requested = requested(&fixture).await;
    let agreed = fixture
        .consumer
        .handle_contract_agreement_message(
            requested.consumer_pid(),
            agreement_message(&requested, &offer()),
        )
        .await
        .unwrap();

    let err = fixture
        .consumer
        .handle_contract_negotiation_event_message_finalize(
            agreed.consumer_pid(),
            finalized_event(&agreed),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NegotiationError::InvalidState {
            from: NegotiationState::Agreed,
            to: NegotiationState::Finalized
        }
    ));
    assert!(fixture.administration.created().is_empty());
    assert_eq!(
        fixture.events.count(|event| matches!(
            event,
            NegotiationEvent::TransferInitializationRequested { .. }
        )),
        0
    );
}

#[tokio::test]
async fn accepted_event_is_not_handled_by_consumer() {
    let fixture = fixture();
    let requested = requested(&fixture).await;
    let mut message = finalized_event(&requested);
    message.event_type = NegotiationEventType::Accepted;

    let err = fixture
        .consumer
        .handle_contract_negotiation_event_message_finalize(requested.consumer_pid(), message)
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::InvalidEventType { .. }));
}

#[tokio::test]
async fn unreachable_provider_commits_nothing() {
    let fixture = fixture_with(RecordingPeer::failing(PeerError::transient("connection refused")), false);

    let err = fixture
        .consumer
        .request_negotiation(PROVIDER_ADDRESS, offer())
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::Peer(PeerError::Transient { .. })));
    assert_eq!(fixture.store.saves(), 0);
    assert!(fixture.events.events().is_empty());
}

#[tokio::test]
async fn automatic_consumer_accepts_initial_offer() {
    let fixture = fixture_with(RecordingPeer::new(), true);
    let offered = fixture
        .consumer
        .handle_contract_offer_message(initial_offer("urn:uuid:p1"))
        .await
        .unwrap();

    let consumer = Arc::clone(&fixture.consumer);
    let consumer_pid = offered.consumer_pid().clone();
    let accepted = eventually(|| {
        let consumer = Arc::clone(&consumer);
        let consumer_pid = consumer_pid.clone();
        async move {
            consumer
                .negotiation_by_consumer_pid(&consumer_pid)
                .await
                .is_ok_and(|negotiation| negotiation.state() == NegotiationState::Accepted)
        }
    })
    .await;

    assert!(accepted);
    assert_eq!(fixture.peer.kinds(), vec!["ContractNegotiationEventMessage"]);
}

#[tokio::test]
async fn failed_finalize_write_revokes_enforcement() {
    let fixture = fixture_with_store(
        CountingStore::refusing(NegotiationState::Finalized),
        RecordingPeer::new(),
        false,
    );
    let requested = requested(&fixture).await;
    let consumer_pid = requested.consumer_pid().clone();
    fixture
        .consumer
        .handle_contract_agreement_message(&consumer_pid, agreement_message(&requested, &offer()))
        .await
        .unwrap();
    let verified = fixture.consumer.verify_agreement(&consumer_pid).await.unwrap();

    let err = fixture
        .consumer
        .handle_contract_negotiation_event_message_finalize(&consumer_pid, finalized_event(&verified))
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::Store(_)));
    assert!(fixture.administration.created().is_empty());
    assert_eq!(
        fixture
            .consumer
            .negotiation_by_consumer_pid(&consumer_pid)
            .await
            .unwrap()
            .state(),
        NegotiationState::Verified
    );
    assert_eq!(
        fixture.events.count(|event| matches!(
            event,
            NegotiationEvent::TransferInitializationRequested { .. }
        )),
        0
    );
}
