//! Vault client configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_common::RetryConfig;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::secrets::Identity;

const DEFAULT_RENEWAL_THRESHOLD: f64 = 0.2;

/// Rejected client settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Address that does not parse as a URL
    #[error("{field} is not a valid URL: {reason}")]
    InvalidUrl {
        /// Variable name
        field: String,
        /// Parser message
        reason: String,
    },

    /// Setting left empty
    #[error("{0} must not be empty")]
    MissingRequired(String),

    /// Value that does not parse or is out of range
    #[error("Invalid value for {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },
}

/// What to do with a session Vault will not renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonRenewablePolicy {
    /// Log in again once the renewal threshold of the lease is reached
    ReauthenticateBeforeExpiry,
    /// Log in again on a fixed schedule
    ReauthenticateEvery(Duration),
    /// Keep the credential until shutdown
    KeepForProcessLifetime,
}

impl FromStr for NonRenewablePolicy {
    type Err = String;

    /// Accepts `before-expiry`, `keep` or a number of seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "before-expiry" => Ok(Self::ReauthenticateBeforeExpiry),
            "keep" => Ok(Self::KeepForProcessLifetime),
            secs => secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(|secs| Self::ReauthenticateEvery(Duration::from_secs(secs)))
                .ok_or_else(|| format!("expected before-expiry, keep or seconds, got {secs:?}")),
        }
    }
}

/// Where the Vault server is and how to log in, read and renew.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault server address
    pub addr: String,
    /// Kubernetes auth role name
    pub role: String,
    /// Mount point of the Kubernetes auth method
    pub auth_mount: String,
    /// Service account token path
    pub token_path: PathBuf,
    /// Pre-issued token tried before logging in
    pub token: Option<SecretString>,
    /// KV v2 mount holding the database secret
    pub kv_mount: String,
    /// Secret path inside the mount
    pub secret_path: String,
    /// Field carrying the password
    pub secret_field: String,
    /// Deadline for every broker call
    pub timeout: Duration,
    /// Increment requested on each renewal
    pub renew_increment: Duration,
    /// Fraction of the lease left when renewal fires (clamped to 0.1-0.5)
    pub renewal_threshold: f64,
    /// Handling of non-renewable sessions
    pub non_renewable: NonRenewablePolicy,
    /// Backoff between failed login cycles
    pub retry: RetryConfig,
    /// Skip TLS verification, for dev clusters only
    pub accept_invalid_certs: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: "http://vault:8200".to_string(),
            role: "knox".to_string(),
            auth_mount: "kubernetes".to_string(),
            token_path: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token"),
            token: None,
            kv_mount: "knox".to_string(),
            secret_path: "microservice/secret".to_string(),
            secret_field: "password".to_string(),
            timeout: Duration::from_secs(10),
            renew_increment: Duration::from_secs(3600),
            renewal_threshold: DEFAULT_RENEWAL_THRESHOLD,
            non_renewable: NonRenewablePolicy::ReauthenticateBeforeExpiry,
            retry: RetryConfig::default()
                .with_unlimited_retries()
                .with_initial_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(60)),
            accept_invalid_certs: false,
        }
    }
}

impl VaultConfig {
    /// Defaults with an explicit address and role.
    #[must_use]
    pub fn new(addr: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    /// Loads configuration from environment variables with validation.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
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
        let defaults = Self::default();
        let text = |name: &str, default: String| lookup(name).unwrap_or(default);

        let mut retry = defaults.retry.clone();
        retry.initial_delay = Duration::from_millis(parse_var(
            &lookup,
            "VAULT_RETRY_INITIAL_MS",
            u64::try_from(retry.initial_delay.as_millis()).unwrap_or(u64::MAX),
        )?);
        retry.max_delay = Duration::from_secs(parse_var(
            &lookup,
            "VAULT_RETRY_MAX_DELAY",
            retry.max_delay.as_secs(),
        )?);
        if let Some(max) = lookup("VAULT_RETRY_MAX_ATTEMPTS") {
            retry = retry.with_max_retries(parse_value("VAULT_RETRY_MAX_ATTEMPTS", &max)?);
        }

        let mut config = Self {
            addr: text("VAULT_ADDR", defaults.addr),
            role: text("VAULT_ROLE", defaults.role),
            auth_mount: text("VAULT_AUTH_MOUNT", defaults.auth_mount),
            token_path: lookup("VAULT_TOKEN_PATH").map_or(defaults.token_path, PathBuf::from),
            token: lookup("VAULT_TOKEN")
                .filter(|token| !token.is_empty())
                .map(SecretString::from),
            kv_mount: text("VAULT_KV_MOUNT", defaults.kv_mount),
            secret_path: text("VAULT_SECRET_PATH", defaults.secret_path),
            secret_field: text("VAULT_SECRET_FIELD", defaults.secret_field),
            timeout: Duration::from_secs(parse_var(
                &lookup,
                "VAULT_REQUEST_TIMEOUT",
                defaults.timeout.as_secs(),
            )?),
            renew_increment: Duration::from_secs(parse_var(
                &lookup,
                "VAULT_RENEW_INCREMENT",
                defaults.renew_increment.as_secs(),
            )?),
            renewal_threshold: parse_var(&lookup, "VAULT_RENEWAL_THRESHOLD", defaults.renewal_threshold)?,
            non_renewable: parse_var(&lookup, "VAULT_NON_RENEWABLE_POLICY", defaults.non_renewable)?,
            retry,
            accept_invalid_certs: parse_var(&lookup, "VAULT_SKIP_VERIFY", false)?,
        };

        config.validate()?;
        config.renewal_threshold = bounded_threshold(config.renewal_threshold);
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.addr).map_err(|e| ConfigError::InvalidUrl {
            field: "VAULT_ADDR".to_string(),
            reason: e.to_string(),
        })?;
        for (name, value) in [
            ("VAULT_ROLE", &self.role),
            ("VAULT_AUTH_MOUNT", &self.auth_mount),
            ("VAULT_KV_MOUNT", &self.kv_mount),
            ("VAULT_SECRET_PATH", &self.secret_path),
            ("VAULT_SECRET_FIELD", &self.secret_field),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired(name.to_string()));
            }
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ParseError {
                name: "VAULT_REQUEST_TIMEOUT".to_string(),
                reason: "timeout must be greater than 0".to_string(),
            });
        }
        if !self.renewal_threshold.is_finite() {
            return Err(ConfigError::ParseError {
                name: "VAULT_RENEWAL_THRESHOLD".to_string(),
                reason: format!("{} is not a finite fraction", self.renewal_threshold),
            });
        }
        if self.renew_increment.is_zero() {
            return Err(ConfigError::ParseError {
                name: "VAULT_RENEW_INCREMENT".to_string(),
                reason: "increment must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Identity used for Kubernetes login.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            role: self.role.clone(),
            auth_mount: self.auth_mount.clone(),
            token_path: self.token_path.clone(),
        }
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the service account token path.
    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Set the secret location and field.
    #[must_use]
    pub fn with_secret(
        mut self,
        kv_mount: impl Into<String>,
        path: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.kv_mount = kv_mount.into();
        self.secret_path = path.into();
        self.secret_field = field.into();
        self
    }

    /// Set the renewal increment.
    #[must_use]
    pub const fn with_renew_increment(mut self, increment: Duration) -> Self {
        self.renew_increment = increment;
        self
    }

    /// Set renewal threshold (clamped to 0.1-0.5, default when not finite).
    #[must_use]
    pub fn with_renewal_threshold(mut self, threshold: f64) -> Self {
        self.renewal_threshold = bounded_threshold(threshold);
        self
    }

    /// Set the non-renewable session policy.
    #[must_use]
    pub const fn with_non_renewable_policy(mut self, policy: NonRenewablePolicy) -> Self {
        self.non_renewable = policy;
        self
    }

    /// Set the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Use a pre-issued token before falling back to login.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }
}

/// Clamp a renewal threshold into 0.1-0.5. NaN and infinities fall back to
/// the default.
pub(crate) fn bounded_threshold(threshold: f64) -> f64 {
    if threshold.is_finite() {
        threshold.clamp(0.1, 0.5)
    } else {
        DEFAULT_RENEWAL_THRESHOLD
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a variable with a default value.
fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map_or(Ok(default), |raw| parse_value(name, &raw))
}
