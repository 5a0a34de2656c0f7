//! Observability utilities for the connector.
//!
//! Installs a `tracing` subscriber whose filter comes from `RUST_LOG` when
//! set, falling back to the configured directive otherwise.

#![warn(missing_docs, clippy::pedantic)]

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, one event per line.
    #[default]
    Pretty,
    /// Compact single line output without targets.
    Compact,
}

/// Builds the filter, preferring `RUST_LOG` over `fallback`.
///
/// # Errors
///
/// Returns an error when `fallback` is not a valid filter directive.
pub fn env_filter(fallback: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(fallback).with_context(|| format!("invalid log filter `{fallback}`"))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails when the filter is invalid or a global subscriber is already set.
pub fn init_tracing(fallback_filter: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(fallback_filter)?;
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .try_init(),
    }
    .context("failed to install tracing subscriber")
}
