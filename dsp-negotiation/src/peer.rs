//! Outbound delivery of protocol messages to the counterparty.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use dsp_config::OutboundConfig;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::messages::{NegotiationAck, ProtocolMessage};

/// Errors surfaced while delivering a protocol message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// Delivery failed in a way a retry may fix.
    #[error("counterparty unreachable: {reason}")]
    Transient {
        /// What went wrong.
        reason: String,
    },
    /// The counterparty refused the message.
    #[error("counterparty rejected the message with status {status}: {reason}")]
    Rejected {
        /// HTTP status returned.
        status: u16,
        /// Body or error text returned.
        reason: String,
    },
    /// The message or the acknowledgement could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Retry configuration was invalid.
    #[error("invalid outbound configuration: {0}")]
    InvalidConfig(&'static str),
}

impl PeerError {
    /// Convenience helper to construct transient errors.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Classifies a non-success status: 5xx is transient, anything else a
    /// rejection.
    #[must_use]
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        if status >= 500 {
            Self::Transient {
                reason: format!("status {status}: {}", reason.into()),
            }
        } else {
            Self::Rejected {
                status,
                reason: reason.into(),
            }
        }
    }

    /// Returns `true` when the delivery may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Result alias for peer operations.
pub type PeerResult<T> = Result<T, PeerError>;

/// Transport to the counterparty's protocol endpoints.
#[async_trait]
pub trait RemotePeer: Send + Sync {
    /// Delivers the message to `address` and returns the acknowledgement.
    async fn send(&self, address: &str, message: &ProtocolMessage) -> PeerResult<NegotiationAck>;
}

/// Bounded retry with doubling delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    max_attempts: NonZeroU32,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
}

impl RetryConfig {
    /// Creates a new configuration.
    #[must_use]
    pub const fn new(
        max_attempts: NonZeroU32,
        initial_retry_delay: Duration,
        max_retry_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_retry_delay,
            max_retry_delay,
        }
    }

    /// Returns the number of attempts, the first one included.
    #[must_use]
    pub const fn max_attempts(self) -> NonZeroU32 {
        self.max_attempts
    }

    /// Returns the initial retry delay.
    #[must_use]
    pub const fn initial_retry_delay(self) -> Duration {
        self.initial_retry_delay
    }

    /// Returns the maximum retry delay.
    #[must_use]
    pub const fn max_retry_delay(self) -> Duration {
        self.max_retry_delay
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::InvalidConfig`] when a delay is zero or the
    /// delay bounds are inconsistent.
    pub fn validate(self) -> PeerResult<()> {
        if self.initial_retry_delay.is_zero() {
            return Err(PeerError::InvalidConfig(
                "initial retry delay must be greater than zero",
            ));
        }
        if self.max_retry_delay.is_zero() {
            return Err(PeerError::InvalidConfig(
                "max retry delay must be greater than zero",
            ));
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err(PeerError::InvalidConfig(
                "initial retry delay cannot exceed max retry delay",
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::MIN.saturating_add(2),
            initial_retry_delay: Duration::from_millis(200),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

impl TryFrom<&OutboundConfig> for RetryConfig {
    type Error = PeerError;

    fn try_from(config: &OutboundConfig) -> PeerResult<Self> {
        let max_attempts = NonZeroU32::new(config.max_attempts).ok_or(PeerError::InvalidConfig(
            "outbound max attempts must be greater than zero",
        ))?;
        let retry = Self::new(
            max_attempts,
            config.initial_retry_delay(),
            config.max_retry_delay(),
        );
        retry.validate()?;
        Ok(retry)
    }
}

/// Sends `message`, retrying transient failures up to the configured limit.
///
/// Rejections are returned immediately.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first
/// rejection.
pub async fn send_with_retry(
    peer: &dyn RemotePeer,
    address: &str,
    message: &ProtocolMessage,
    config: RetryConfig,
) -> PeerResult<NegotiationAck> {
    let mut retry_delay = config.initial_retry_delay();
    let mut attempt = 1;

    loop {
        match peer.send(address, message).await {
            Ok(ack) => {
                debug!(address, message = message.kind(), attempt, "message acknowledged");
                return Ok(ack);
            }
            Err(err) if err.is_transient() && attempt < config.max_attempts().get() => {
                warn!(
                    address,
                    message = message.kind(),
                    attempt,
                    %err,
                    "outbound delivery failed; retrying"
                );
                sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(config.max_retry_delay());
                attempt += 1;
            }
            Err(err) => {
                warn!(
                    address,
                    message = message.kind(),
                    attempt,
                    %err,
                    "outbound delivery failed"
                );
                return Err(err);
            }
        }
    }
}
