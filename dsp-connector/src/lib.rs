//! Dataspace connector SDK facade.
//!
//! Depend on this crate via `cargo add dsp-connector`. It bundles the
//! negotiation, policy, configuration, and telemetry crates behind feature
//! flags so connectors only compile what they use.

#![warn(missing_docs, clippy::pedantic)]

/// Correlation and agreement identifiers.
pub use dsp_primitives as primitives;

/// ODRL model and enforcement (enabled by `policy` feature).
#[cfg(feature = "policy")]
pub use dsp_policy as policy;

/// Provider and consumer negotiation dispatchers (enabled by `negotiation` feature).
#[cfg(feature = "negotiation")]
pub use dsp_negotiation as negotiation;

/// Connector configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use dsp_config as config;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use dsp_telemetry as telemetry;
