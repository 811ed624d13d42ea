//! Agent configuration.
//!
//! Vault settings come from [`VaultConfig::from_lookup`]; the agent adds
//! logging, shutdown and database target variables on top.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use auth_vault_client::VaultConfig;
use thiserror::Error;

use crate::database::DatabaseTarget;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Vault section is invalid
    #[error(transparent)]
    Vault(#[from] auth_vault_client::ConfigError),

    /// Environment variable parse error
    #[error("Invalid value for {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },

    /// Invalid shutdown timeout
    #[error("Invalid shutdown timeout: must be greater than 0")]
    InvalidShutdownTimeout,
}

/// Agent configuration with validation.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Vault login and secret location
    pub vault: VaultConfig,
    /// Log level filter
    pub log_level: String,
    /// Emit JSON logs
    pub log_json: bool,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Database the credential is for
    pub database: DatabaseTarget,
}

impl AgentConfig {
    /// Loads configuration from environment variables with validation.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vault = VaultConfig::from_lookup(&lookup)?;
        let database = DatabaseTarget::default();

        let config = Self {
            vault,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: parse_env(&lookup, "LOG_JSON", false)?,
            shutdown_timeout: Duration::from_secs(parse_env(&lookup, "SHUTDOWN_TIMEOUT", 30)?),
            database: DatabaseTarget {
                user: lookup("DB_USER").unwrap_or(database.user),
                addr: lookup("DB_ADDR").unwrap_or(database.addr),
                name: lookup("DB_NAME").unwrap_or(database.name),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::InvalidShutdownTimeout);
        }
        Ok(())
    }
}

/// Parse an environment variable with a default value.
fn parse_env<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[("VAULT_ADDR", "http://vault:8200")])).unwrap();

        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.database, DatabaseTarget::default());
        assert_eq!(config.vault.secret_path, "microservice/secret");
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("VAULT_ADDR", "https://vault.internal:8200"),
            ("VAULT_ROLE", "orders"),
            ("LOG_LEVEL", "debug"),
            ("LOG_JSON", "true"),
            ("SHUTDOWN_TIMEOUT", "5"),
            ("DB_USER", "orders"),
            ("DB_ADDR", "db:3307"),
            ("DB_NAME", "orders"),
        ]))
        .unwrap();

        assert_eq!(config.vault.role, "orders");
        assert_eq!(config.log_level, "debug");
        assert!(config.log_json);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.database.addr, "db:3307");
    }

    #[test]
    fn test_invalid_bool() {
        let err = AgentConfig::from_lookup(lookup(&[
            ("VAULT_ADDR", "http://vault:8200"),
            ("LOG_JSON", "yes please"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref name, .. } if name == "LOG_JSON"));
    }

    #[test]
    fn test_zero_shutdown_timeout_rejected() {
        let err = AgentConfig::from_lookup(lookup(&[
            ("VAULT_ADDR", "http://vault:8200"),
            ("SHUTDOWN_TIMEOUT", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidShutdownTimeout));
    }

    #[test]
    fn test_vault_errors_surface() {
        let err = AgentConfig::from_lookup(lookup(&[("VAULT_ADDR", "not a url")])).unwrap_err();
        assert!(matches!(err, ConfigError::Vault(_)));
    }
}
