//! Strongly typed configuration schema.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root connector configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Negotiation behaviour.
    pub negotiation: NegotiationConfig,
    /// Outbound calls to the counterparty.
    pub outbound: OutboundConfig,
    /// Log output.
    pub log: LogConfig,
}

/// Negotiation behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NegotiationConfig {
    /// Advance negotiations without waiting for an operator.
    pub automatic: bool,
    /// Base URL the counterparty sends protocol messages back to.
    pub callback_address: String,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            automatic: false,
            callback_address: "http://localhost:8080/protocol".to_owned(),
        }
    }
}

/// Retry and timeout settings for outbound protocol calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutboundConfig {
    /// Attempts per outbound message, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_retry_delay_ms: u64,
    /// Upper bound for the doubling retry delay.
    pub max_retry_delay_ms: u64,
    /// Per-attempt request timeout.
    pub request_timeout_ms: u64,
}

impl OutboundConfig {
    /// Returns the initial retry delay.
    #[must_use]
    pub const fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    /// Returns the maximum retry delay.
    #[must_use]
    pub const fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Returns the per-attempt request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_retry_delay_ms: 200,
            max_retry_delay_ms: 2_000,
            request_timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info,dsp_negotiation=debug`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

/// Errors surfaced by configuration validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field held a value the connector cannot run with.
    #[error("invalid connector configuration: {0}")]
    Invalid(&'static str),
}

impl ConnectorConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the callback address is blank,
    /// no outbound attempt is allowed, a delay is zero, or the retry delay
    /// bounds are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.negotiation.callback_address.trim().is_empty() {
            return Err(ConfigError::Invalid("callback address cannot be blank"));
        }
        let outbound = &self.outbound;
        if outbound.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "outbound max attempts must be greater than zero",
            ));
        }
        if outbound.initial_retry_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "initial retry delay must be greater than zero",
            ));
        }
        if outbound.max_retry_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "max retry delay must be greater than zero",
            ));
        }
        if outbound.initial_retry_delay_ms > outbound.max_retry_delay_ms {
            return Err(ConfigError::Invalid(
                "initial retry delay cannot exceed max retry delay",
            ));
        }
        if outbound.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConnectorConfig::default();
        config.validate().unwrap();
        assert!(!config.negotiation.automatic);
        assert_eq!(config.outbound.max_attempts, 3);
        assert_eq!(config.outbound.initial_retry_delay(), Duration::from_millis(200));
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn rejects_inconsistent_retry_bounds() {
        let mut config = ConnectorConfig::default();
        config.outbound.initial_retry_delay_ms = 5_000;

        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid("initial retry delay cannot exceed max retry delay")
        );
    }

    #[test]
    fn rejects_zero_attempts_and_blank_callback() {
        let mut config = ConnectorConfig::default();
        config.outbound.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ConnectorConfig::default();
        config.negotiation.callback_address = "  ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_documents_fall_back_to_defaults() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{ "negotiation": { "automatic": true } }"#).unwrap();
        assert!(config.negotiation.automatic);
        assert_eq!(config.outbound, OutboundConfig::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<ConnectorConfig>(r#"{ "negotiaton": {} }"#);
        assert!(result.is_err());
    }
}
