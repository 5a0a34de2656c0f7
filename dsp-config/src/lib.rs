//! Configuration management for the connector.
//!
//! [`ConnectorConfig`] is read from an optional JSON file, then selected
//! fields are overridden from `DSP_*` environment variables.

#![warn(missing_docs, clippy::pedantic)]

pub mod loader;
pub mod schema;

pub use loader::{
    ConfigLoader, ENV_AUTOMATIC_NEGOTIATION, ENV_CALLBACK_ADDRESS, ENV_LOG_FILTER,
    ENV_OUTBOUND_MAX_ATTEMPTS,
};
pub use schema::{ConfigError, ConnectorConfig, LogConfig, NegotiationConfig, OutboundConfig};
