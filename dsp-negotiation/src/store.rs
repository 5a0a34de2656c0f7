//! Negotiation persistence port and an in-memory implementation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use dsp_primitives::{ConsumerPid, PidPair, ProviderPid};
use thiserror::Error;

use crate::negotiation::ContractNegotiation;

/// Errors surfaced by negotiation stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The negotiation changed since it was read.
    #[error("negotiation {pids} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        /// Negotiation being saved.
        pids: PidPair,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
    /// Store backend failure.
    #[error("negotiation store failure: {reason}")]
    Backend {
        /// Human-readable context provided by the backend.
        reason: String,
    },
}

impl StoreError {
    /// Convenience helper to construct backend errors.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for contract negotiations.
///
/// `save` is a compare-and-set on [`ContractNegotiation::version`]: it fails
/// with [`StoreError::Conflict`] when the stored version differs from the
/// caller's copy, and returns the copy stamped with the new version.
#[async_trait]
pub trait NegotiationStore: Send + Sync {
    /// Finds the negotiation identified by both pids.
    async fn find_by_provider_pid_and_consumer_pid(
        &self,
        provider_pid: &ProviderPid,
        consumer_pid: &ConsumerPid,
    ) -> StoreResult<Option<ContractNegotiation>>;

    /// Finds a negotiation by provider pid.
    async fn find_by_provider_pid(
        &self,
        provider_pid: &ProviderPid,
    ) -> StoreResult<Option<ContractNegotiation>>;

    /// Finds a negotiation by consumer pid.
    async fn find_by_consumer_pid(
        &self,
        consumer_pid: &ConsumerPid,
    ) -> StoreResult<Option<ContractNegotiation>>;

    /// Inserts or updates the negotiation.
    async fn save(&self, negotiation: &ContractNegotiation) -> StoreResult<ContractNegotiation>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryNegotiationStore {
    negotiations: RwLock<HashMap<PidPair, ContractNegotiation>>,
}

impl InMemoryNegotiationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many negotiations are stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.negotiations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, predicate: impl Fn(&ContractNegotiation) -> bool) -> Option<ContractNegotiation> {
        self.negotiations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|negotiation| predicate(negotiation))
            .cloned()
    }
}

#[async_trait]
impl NegotiationStore for InMemoryNegotiationStore {
    async fn find_by_provider_pid_and_consumer_pid(
        &self,
        provider_pid: &ProviderPid,
        consumer_pid: &ConsumerPid,
    ) -> StoreResult<Option<ContractNegotiation>> {
        let key = PidPair::new(provider_pid.clone(), consumer_pid.clone());
        Ok(self
            .negotiations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned())
    }

    async fn find_by_provider_pid(
        &self,
        provider_pid: &ProviderPid,
    ) -> StoreResult<Option<ContractNegotiation>> {
        Ok(self.find(|negotiation| negotiation.provider_pid() == provider_pid))
    }

    async fn find_by_consumer_pid(
        &self,
        consumer_pid: &ConsumerPid,
    ) -> StoreResult<Option<ContractNegotiation>> {
        Ok(self.find(|negotiation| negotiation.consumer_pid() == consumer_pid))
    }

    async fn save(&self, negotiation: &ContractNegotiation) -> StoreResult<ContractNegotiation> {
        let pids = negotiation.pids();
        let mut guard = self
            .negotiations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let actual = guard.get(&pids).map_or(0, ContractNegotiation::version);
        if actual != negotiation.version() {
            return Err(StoreError::Conflict {
                pids,
                expected: negotiation.version(),
                actual,
            });
        }
        let mut saved = negotiation.clone();
        saved.set_version(actual + 1);
        guard.insert(pids, saved.clone());
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{NegotiationState, Role};
    use dsp_policy::Offer;

    fn negotiation() -> ContractNegotiation {
        ContractNegotiation::new(
            PidPair::new(ProviderPid::from("urn:uuid:p1"), ConsumerPid::from("urn:uuid:c1")),
            Role::Provider,
            NegotiationState::Requested,
            "https://consumer.example/dsp",
            Offer::new("urn:offer:1", "urn:asset:1", "urn:provider", "urn:consumer"),
        )
    }

    #[tokio::test]
    async fn save_bumps_version_and_indexes_both_pids() {
        let store = InMemoryNegotiationStore::new();
        let saved = store.save(&negotiation()).await.unwrap();
        assert_eq!(saved.version(), 1);

        let by_provider = store
            .find_by_provider_pid(&ProviderPid::from("urn:uuid:p1"))
            .await
            .unwrap()
            .unwrap();
        let by_consumer = store
            .find_by_consumer_pid(&ConsumerPid::from("urn:uuid:c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_provider.version(), 1);
        assert_eq!(by_consumer.pids(), saved.pids());
        assert!(
            store
                .find_by_provider_pid_and_consumer_pid(
                    &ProviderPid::from("urn:uuid:p1"),
                    &ConsumerPid::from("urn:uuid:other"),
                )
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn stale_copies_conflict() {
        let store = InMemoryNegotiationStore::new();
        let first = store.save(&negotiation()).await.unwrap();
        store.save(&first).await.unwrap();

        let err = store.save(&first).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryNegotiationStore::new();
        store.save(&negotiation()).await.unwrap();
        assert!(store.save(&negotiation()).await.is_err());
    }
}
