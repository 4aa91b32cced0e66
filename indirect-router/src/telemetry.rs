//! Tracing subscriber initialisation.

use indirect_core::{ConfigError, IndirectResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "indirect=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `RUST_LOG`: filter directives (default: `indirect=info`)
    /// - `INDIRECT_LOG_FORMAT`: `json` or `pretty` (default: pretty)
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            filter: var("RUST_LOG")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.filter),
            format: match var("INDIRECT_LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => defaults.format,
            },
        }
    }
}

/// Install the global tracing subscriber.
///
/// Safe to call more than once: later calls leave the first subscriber in
/// place. A malformed filter is a config error.
pub fn init_tracing(config: &TelemetryConfig) -> IndirectResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "RUST_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let json = config.format == LogFormat::Json;
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().pretty()))
        .try_init();

    match installed {
        Ok(()) => {
            tracing::info!(filter = %config.filter, format = ?config.format, "Telemetry initialized");
        }
        Err(e) => {
            tracing::debug!(error = %e, "Tracing subscriber already installed");
        }
    }
    Ok(())
}
