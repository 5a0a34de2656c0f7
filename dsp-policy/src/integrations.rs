//! Ports to the external metering and policy administration systems.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dsp_primitives::AgreementId;
use tracing::{debug, info};

use crate::error::{PolicyError, PolicyResult};

/// Read access to per-agreement usage counters.
#[async_trait]
pub trait AccessCounter: Send + Sync {
    /// Returns how often the agreement's asset has been accessed.
    ///
    /// Fails with [`PolicyError::EnforcementRecordNotFound`] when the
    /// agreement has no enforcement record.
    async fn access_count(&self, agreement_id: &AgreementId) -> PolicyResult<u64>;
}

/// Creates enforcement records once an agreement is finalized.
#[async_trait]
pub trait PolicyAdministration: Send + Sync {
    /// Creates the enforcement record for the agreement.
    async fn create_enforcement(&self, agreement_id: &AgreementId) -> PolicyResult<()>;

    /// Removes the agreement's enforcement record so it no longer grants
    /// access.
    ///
    /// Fails with [`PolicyError::EnforcementRecordNotFound`] when there is no
    /// record.
    async fn revoke_enforcement(&self, agreement_id: &AgreementId) -> PolicyResult<()>;
}

/// Process-local access counter with atomic increments.
#[derive(Debug, Default)]
pub struct InMemoryAccessCounter {
    counters: RwLock<HashMap<AgreementId, Arc<AtomicU64>>>,
}

impl InMemoryAccessCounter {
    /// Creates an empty counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts counting for the agreement at zero.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EnforcementRecordExists`] when the agreement is
    /// already tracked.
    pub fn register(&self, agreement_id: &AgreementId) -> PolicyResult<()> {
        let mut guard = self
            .counters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.contains_key(agreement_id) {
            return Err(PolicyError::EnforcementRecordExists(agreement_id.clone()));
        }
        guard.insert(agreement_id.clone(), Arc::new(AtomicU64::new(0)));
        Ok(())
    }

    /// Stops counting for the agreement and forgets its count.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EnforcementRecordNotFound`] for untracked
    /// agreements.
    pub fn unregister(&self, agreement_id: &AgreementId) -> PolicyResult<()> {
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(agreement_id)
            .map(|_| ())
            .ok_or_else(|| PolicyError::EnforcementRecordNotFound(agreement_id.clone()))
    }

    /// Records one access and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EnforcementRecordNotFound`] for untracked
    /// agreements.
    pub fn record_access(&self, agreement_id: &AgreementId) -> PolicyResult<u64> {
        let counter = self.counter(agreement_id)?;
        let count = counter.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(agreement_id = %agreement_id, count, "access recorded");
        Ok(count)
    }

    fn counter(&self, agreement_id: &AgreementId) -> PolicyResult<Arc<AtomicU64>> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agreement_id)
            .cloned()
            .ok_or_else(|| PolicyError::EnforcementRecordNotFound(agreement_id.clone()))
    }
}

#[async_trait]
impl AccessCounter for InMemoryAccessCounter {
    async fn access_count(&self, agreement_id: &AgreementId) -> PolicyResult<u64> {
        Ok(self.counter(agreement_id)?.load(Ordering::Acquire))
    }
}

/// Policy administration that opens a counter for every finalized agreement.
#[derive(Debug, Clone)]
pub struct InMemoryPolicyAdministration {
    counter: Arc<InMemoryAccessCounter>,
}

impl InMemoryPolicyAdministration {
    /// Creates an administration backed by the supplied counter store.
    #[must_use]
    pub fn new(counter: Arc<InMemoryAccessCounter>) -> Self {
        Self { counter }
    }

    /// Returns the counter store records are created in.
    #[must_use]
    pub fn counter(&self) -> &Arc<InMemoryAccessCounter> {
        &self.counter
    }
}

#[async_trait]
impl PolicyAdministration for InMemoryPolicyAdministration {
    async fn create_enforcement(&self, agreement_id: &AgreementId) -> PolicyResult<()> {
        self.counter.register(agreement_id)?;
        info!(agreement_id = %agreement_id, "policy enforcement record created");
        Ok(())
    }

    async fn revoke_enforcement(&self, agreement_id: &AgreementId) -> PolicyResult<()> {
        self.counter.unregister(agreement_id)?;
        info!(agreement_id = %agreement_id, "policy enforcement record revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_is_not_found_until_enforcement_is_created() {
        let counter = Arc::new(InMemoryAccessCounter::new());
        let admin = InMemoryPolicyAdministration::new(Arc::clone(&counter));
        let agreement_id = AgreementId::from("urn:uuid:a1");

        let err = counter.access_count(&agreement_id).await.unwrap_err();
        assert_eq!(err, PolicyError::EnforcementRecordNotFound(agreement_id.clone()));

        admin.create_enforcement(&agreement_id).await.unwrap();
        assert_eq!(counter.access_count(&agreement_id).await.unwrap(), 0);

        counter.record_access(&agreement_id).unwrap();
        counter.record_access(&agreement_id).unwrap();
        assert_eq!(counter.access_count(&agreement_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_enforcement_is_rejected() {
        let admin = InMemoryPolicyAdministration::new(Arc::new(InMemoryAccessCounter::new()));
        let agreement_id = AgreementId::from("urn:uuid:a1");

        admin.create_enforcement(&agreement_id).await.unwrap();
        let err = admin.create_enforcement(&agreement_id).await.unwrap_err();
        assert!(matches!(err, PolicyError::EnforcementRecordExists(_)));
    }

    #[tokio::test]
    async fn revoked_enforcement_stops_counting() {
        let counter = Arc::new(InMemoryAccessCounter::new());
        let admin = InMemoryPolicyAdministration::new(Arc::clone(&counter));
        let agreement_id = AgreementId::from("urn:uuid:a1");

        admin.create_enforcement(&agreement_id).await.unwrap();
        counter.record_access(&agreement_id).unwrap();
        admin.revoke_enforcement(&agreement_id).await.unwrap();

        let err = counter.access_count(&agreement_id).await.unwrap_err();
        assert_eq!(err, PolicyError::EnforcementRecordNotFound(agreement_id.clone()));
        let err = admin.revoke_enforcement(&agreement_id).await.unwrap_err();
        assert_eq!(err, PolicyError::EnforcementRecordNotFound(agreement_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn increments_are_atomic() {
        let counter = Arc::new(InMemoryAccessCounter::new());
        let agreement_id = AgreementId::from("urn:uuid:a1");
        counter.register(&agreement_id).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let agreement_id = agreement_id.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    counter.record_access(&agreement_id).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.access_count(&agreement_id).await.unwrap(), 2_000);
    }
}
