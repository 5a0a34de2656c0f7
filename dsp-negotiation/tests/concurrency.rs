mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{
    CONSUMER_ADDRESS, CountingAdministration, CountingStore, PROVIDER_ADDRESS, RecordingPeer,
    catalog, core, offer, settings,
};
use dsp_negotiation::{
    CollectingPublisher, ContractAgreementVerificationMessage, ContractRequestMessage,
    NegotiationError, NegotiationState, ProviderDispatcher,
};
use dsp_primitives::{ConsumerPid, ProviderPid};
use futures::future::join_all;

fn provider() -> (Arc<ProviderDispatcher>, Arc<CountingStore>) {
    let store = CountingStore::new();
    let provider = ProviderDispatcher::new(
        core(
            store.clone(),
            RecordingPeer::new(),
            CollectingPublisher::new(),
            settings(PROVIDER_ADDRESS, false),
        ),
        catalog(),
        CountingAdministration::new(),
    );
    (provider, store)
}

fn request(consumer_pid: &str) -> ContractRequestMessage {
    ContractRequestMessage {
        provider_pid: ProviderPid::blank(),
        consumer_pid: ConsumerPid::from(consumer_pid),
        offer: offer(),
        callback_address: CONSUMER_ADDRESS.to_owned(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_requests_create_one_negotiation() {
    let (provider, store) = provider();

    let handles = (0..32).map(|_| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            provider
                .handle_contract_request_message(request("urn:uuid:c1"))
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let created = results.iter().filter(|result| result.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|result| matches!(result, Err(NegotiationError::AlreadyExists { .. })))
        .count();
    assert_eq!(created, 1);
    assert_eq!(duplicates, 31);
    assert_eq!(store.saves(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_verifications_advance_once() {
    let (provider, store) = provider();
    let requested = provider
        .handle_contract_request_message(request("urn:uuid:c1"))
        .await
        .unwrap();
    let agreed = provider
        .send_agreement(requested.provider_pid())
        .await
        .unwrap();
    assert_eq!(agreed.state(), NegotiationState::Agreed);

    let handles = (0..16).map(|_| {
        let provider = Arc::clone(&provider);
        let message = ContractAgreementVerificationMessage {
            provider_pid: agreed.provider_pid().clone(),
            consumer_pid: agreed.consumer_pid().clone(),
        };
        tokio::spawn(async move {
            let provider_pid = message.provider_pid.clone();
            provider
                .handle_contract_agreement_verification_message(&provider_pid, message)
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|result| result.as_ref().err())
            .all(|err| matches!(
                err,
                NegotiationError::InvalidState {
                    from: NegotiationState::Verified,
                    to: NegotiationState::Verified
                }
            ))
    );
    assert_eq!(store.saves(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_negotiations_proceed_independently() {
    let (provider, store) = provider();

    let handles = (0..16).map(|index| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            provider
                .handle_contract_request_message(request(&format!("urn:uuid:c{index}")))
                .await
        })
    });
    let negotiations: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let provider_pids: HashSet<_> = negotiations
        .iter()
        .map(|negotiation| negotiation.provider_pid().clone())
        .collect();
    assert_eq!(provider_pids.len(), 16);
    assert_eq!(store.saves(), 16);
}
