//! Tracing subscriber setup

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{LogFormat, ObservabilityConfig, ObservabilityError};

static INITIALIZED: OnceLock<LogFormat> = OnceLock::new();

/// Install the global subscriber described by `config`
///
/// # Errors
///
/// `ObservabilityError::Config` for an invalid filter directive, and
/// `ObservabilityError::TracingInit` when a subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            ObservabilityError::Config(format!("invalid filter '{}': {e}", config.filter))
        })?,
    };

    INITIALIZED
        .set(config.format)
        .map_err(|_| ObservabilityError::TracingInit("Already initialized".to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    installed.map_err(|e| ObservabilityError::TracingInit(e.to_string()))?;

    tracing::info!(
        format = %config.format,
        filter = %config.filter,
        "Initialized structured tracing"
    );
    Ok(())
}

/// Format of the installed subscriber, if [`init_tracing`] succeeded
pub fn installed_format() -> Option<LogFormat> {
    INITIALIZED.get().copied()
}
