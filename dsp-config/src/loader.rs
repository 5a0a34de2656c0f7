//! Configuration loader combining a JSON file with environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::schema::ConnectorConfig;

/// Overrides `negotiation.automatic` (`true`/`false`/`1`/`0`).
pub const ENV_AUTOMATIC_NEGOTIATION: &str = "DSP_AUTOMATIC_NEGOTIATION";
/// Overrides `negotiation.callback_address`.
pub const ENV_CALLBACK_ADDRESS: &str = "DSP_CALLBACK_ADDRESS";
/// Overrides `outbound.max_attempts`.
pub const ENV_OUTBOUND_MAX_ATTEMPTS: &str = "DSP_OUTBOUND_MAX_ATTEMPTS";
/// Overrides `log.filter`.
pub const ENV_LOG_FILTER: &str = "DSP_LOG_FILTER";

/// Loads a [`ConnectorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader that starts from the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the base configuration from a JSON file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Loads, applies process environment overrides, and validates.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, an override is
    /// malformed, or validation rejects the result.
    pub fn load(&self) -> Result<ConnectorConfig> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Like [`ConfigLoader::load`] with an explicit environment lookup.
    ///
    /// # Errors
    ///
    /// See [`ConfigLoader::load`].
    pub fn load_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<ConnectorConfig> {
        let mut config = match &self.path {
            Some(path) => read_file(path)?,
            None => ConnectorConfig::default(),
        };
        apply_overrides(&mut config, env)?;
        config.validate()?;
        Ok(config)
    }
}

fn read_file(path: &Path) -> Result<ConnectorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    debug!(path = %path.display(), "connector configuration loaded");
    Ok(config)
}

fn apply_overrides(
    config: &mut ConnectorConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(value) = env(ENV_AUTOMATIC_NEGOTIATION) {
        config.negotiation.automatic = parse_bool(ENV_AUTOMATIC_NEGOTIATION, &value)?;
    }
    if let Some(value) = env(ENV_CALLBACK_ADDRESS) {
        config.negotiation.callback_address = value;
    }
    if let Some(value) = env(ENV_OUTBOUND_MAX_ATTEMPTS) {
        config.outbound.max_attempts = value
            .trim()
            .parse()
            .with_context(|| format!("{ENV_OUTBOUND_MAX_ATTEMPTS} must be an integer"))?;
    }
    if let Some(value) = env(ENV_LOG_FILTER) {
        config.log.filter = value;
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("{key} must be a boolean, got `{other}`"),
    }
}
