//! Off-request execution of automatic negotiation steps.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const DEFAULT_STEP_LIMIT: NonZeroUsize = NonZeroUsize::MIN.saturating_add(31);

/// Runs follow-up steps such as `send_agreement` or `finalize` in the
/// background, never more than `limit` at once.
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct StepScheduler {
    slots: Arc<Semaphore>,
    limit: NonZeroUsize,
}

impl StepScheduler {
    /// Creates a scheduler running at most `limit` steps concurrently.
    #[must_use]
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limit.get())),
            limit,
        }
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub const fn limit(&self) -> NonZeroUsize {
        self.limit
    }

    /// Returns how many steps currently hold a slot.
    #[must_use]
    pub fn running(&self) -> usize {
        self.limit.get() - self.slots.available_permits()
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.slots.is_closed()
    }

    /// Stops accepting steps. Steps still waiting for a slot are dropped
    /// without running; their handles resolve to `None`.
    pub fn shutdown(&self) {
        self.slots.close();
    }

    /// Queues `step` behind the concurrency limit.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutDown`] once [`shutdown`](Self::shutdown) was
    /// called.
    pub fn submit<F>(
        &self,
        name: &'static str,
        step: F,
    ) -> SchedulerResult<JoinHandle<Option<F::Output>>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(SchedulerError::ShutDown { step: name });
        }
        let slots = Arc::clone(&self.slots);
        Ok(tokio::spawn(async move {
            let _slot = slots.acquire_owned().await.ok()?;
            Some(step.await)
        }))
    }
}

impl Default for StepScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_LIMIT)
    }
}

/// Errors produced by the step scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler no longer accepts steps.
    #[error("step `{step}` refused: scheduler shut down")]
    ShutDown {
        /// Name of the refused step.
        step: &'static str,
    },
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
