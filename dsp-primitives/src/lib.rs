//! Core shared types for dataspace contract negotiation.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;

/// Error type and result alias shared across the connector crates.
pub use error::{Error, Result};
/// Correlation and agreement identifiers.
pub use ids::{AgreementId, ConsumerPid, PidPair, ProviderPid};
