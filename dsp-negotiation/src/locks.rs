//! Per-aggregate mutual exclusion.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Serializes work on the same negotiation while leaving distinct
/// negotiations fully parallel.
///
/// Slots are created on first use and dropped once the last holder or
/// waiter releases them.
#[derive(Clone, Default)]
pub struct AggregateLocks {
    slots: Slots,
}

impl fmt::Debug for AggregateLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateLocks")
            .field("held", &self.held())
            .finish()
    }
}

impl AggregateLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn acquire(&self, key: impl Into<String>) -> AggregateGuard {
        let key = key.into();
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = Arc::clone(&slot).lock_owned().await;
        AggregateGuard {
            key,
            slot,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Returns how many keys are currently held or awaited.
    #[must_use]
    pub fn held(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one key, released on drop.
pub struct AggregateGuard {
    key: String,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl AggregateGuard {
    /// Returns the locked key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for AggregateGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateGuard")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for AggregateGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference lives in the table and one here; any other is a waiter.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}
