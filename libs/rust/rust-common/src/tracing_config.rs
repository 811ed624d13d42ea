//! Tracing subscriber setup.
//!
//! One `EnvFilter` plus one fmt layer; JSON lines when logs are collected
//! from a cluster, human-readable text otherwise.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Shape of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// What [`init_tracing`] installs.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Reported once on startup
    pub service: String,
    /// Filter directives, `RUST_LOG` wins when set
    pub filter: String,
    /// Line shape
    pub format: LogFormat,
}

impl TracingConfig {
    /// Text logs at `info` for `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }

    /// Replace the filter directives.
    #[must_use]
    pub fn with_filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = directives.into();
        self
    }

    /// Switch the line shape.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let (json, text) = match config.format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Text => (None, Some(fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()?;

    tracing::info!(service = %config.service, filter = %config.filter, format = ?config.format, "Logging ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_to_text_at_info() {
        let config = TracingConfig::new("credential-agent");
        assert_eq!(config.service, "credential-agent");
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TracingConfig::new("credential-agent")
            .with_filter("auth_vault_client=debug")
            .with_format(LogFormat::Json);

        assert_eq!(config.filter, "auth_vault_client=debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = TracingConfig::new("test");
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
