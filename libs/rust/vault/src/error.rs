//! Vault error types using thiserror 2.0.
//!
//! Errors are split by the stage that raised them. The lifecycle loop uses
//! [`AuthError::is_fatal`] and the [`Retryable`] classification to pick
//! between stopping, logging in again and waiting for an operator.

use rust_common::{PlatformError, Retryable};
use thiserror::Error;

/// Errors raised by a [`Broker`](crate::broker::Broker) call.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Vault server unavailable
    #[error("Vault unavailable: {0}")]
    Unavailable(String),

    /// Vault refused the request (bad proof, revoked or expired token)
    #[error("Vault rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status returned by Vault
        status: u16,
        /// Response body or error list
        message: String,
    },

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Secret not found
    #[error("Secret not found at path: {0}")]
    SecretNotFound(String),

    /// Rate limited
    #[error("Rate limited")]
    RateLimited,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Call abandoned at its deadline
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl BrokerError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a secret not found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::SecretNotFound(path.into())
    }

    /// Create a rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

/// A request can succeed later, possibly under a fresh token, unless the
/// secret is missing or the path is denied. Those stay that way until
/// someone changes Vault.
impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::SecretNotFound(_) | Self::PermissionDenied(_) => false,
            Self::Platform(e) => e.is_retryable(),
            _ => true,
        }
    }
}

/// Login failures.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The identity proof could not be built; no login can ever succeed
    #[error("Identity proof unavailable: {0}")]
    InitFailure(String),

    /// Vault rejected the proof or could not be reached
    #[error("Kubernetes login rejected: {0}")]
    LoginRejected(#[source] BrokerError),

    /// Vault answered without an auth block
    #[error("Login succeeded without auth info")]
    NoAuthInfo,
}

impl AuthError {
    /// Fatal errors stop the lifecycle loop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InitFailure(_))
    }
}

/// Secret read failures.
#[derive(Error, Debug)]
pub enum SecretError {
    /// The secret exists but does not carry the expected string field.
    /// Retrying cannot fix this.
    #[error("Field {field:?} at {path} is {found}, expected a string")]
    FieldMissingOrWrongType {
        /// Requested field
        field: String,
        /// Secret path
        path: String,
        /// JSON type actually found, or `missing`
        found: &'static str,
    },

    /// The read itself failed
    #[error("Unable to read secret: {0}")]
    Read(#[from] BrokerError),
}

/// Shape mismatches and unreadable paths are reported, never retried.
impl Retryable for SecretError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::FieldMissingOrWrongType { .. } => false,
            Self::Read(e) => e.is_retryable(),
        }
    }
}

/// Renewal watcher failures.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Session was issued as non-renewable
    #[error("Session {0} is not renewable")]
    NotRenewable(uuid::Uuid),

    /// Session carries no lease, there is nothing to renew
    #[error("Session {0} has no lease to renew")]
    NoLease(uuid::Uuid),

    /// Renewal request failed
    #[error("Failed to renew token: {0}")]
    Renewal(#[source] BrokerError),

    /// Renewal answered without an auth block
    #[error("Renewal returned no auth info")]
    NoAuthInfo,

    /// Background task ended without reporting
    #[error("Renewal task stopped unexpectedly")]
    Stopped,
}

/// Errors that end [`LifecycleManager::run`](crate::lifecycle::LifecycleManager::run).
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Login can never succeed
    #[error("Vault authentication is impossible: {0}")]
    Fatal(#[source] AuthError),

    /// The configured retry budget ran out
    #[error("Gave up after {attempts} failed attempts: {last}")]
    RetriesExhausted {
        /// Failed attempts in a row
        attempts: u32,
        /// Last failure
        last: String,
    },
}

/// Result type for Vault operations.
pub type VaultResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::unavailable("connection refused");
        assert_eq!(err.to_string(), "Vault unavailable: connection refused");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BrokerError::Unavailable("timeout".to_string()).is_retryable());
        assert!(BrokerError::RateLimited.is_retryable());
        assert!(BrokerError::rejected(400, "invalid token").is_retryable());
        assert!(BrokerError::Platform(PlatformError::deadline_exceeded(
            "login",
            std::time::Duration::from_secs(10),
        ))
        .is_retryable());
        assert!(!BrokerError::not_found("path").is_retryable());
        assert!(!BrokerError::PermissionDenied("path".into()).is_retryable());
    }

    #[test]
    fn test_auth_error_classification() {
        assert!(AuthError::InitFailure("no token".into()).is_fatal());
        assert!(!AuthError::NoAuthInfo.is_fatal());
        assert!(!AuthError::LoginRejected(BrokerError::rejected(400, "invalid role")).is_fatal());
    }

    #[test]
    fn test_secret_error_classification() {
        let err = SecretError::FieldMissingOrWrongType {
            field: "password".into(),
            path: "knox/microservice/secret".into(),
            found: "missing",
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Field \"password\" at knox/microservice/secret is missing, expected a string"
        );

        assert!(!SecretError::from(BrokerError::not_found("knox/microservice/secret")).is_retryable());
        assert!(!SecretError::from(BrokerError::PermissionDenied("knox/x".into())).is_retryable());
        assert!(SecretError::from(BrokerError::RateLimited).is_retryable());
    }

    #[test]
    fn test_from_platform_error() {
        let err: BrokerError = PlatformError::deadline_exceeded("read", std::time::Duration::from_secs(1)).into();
        assert!(matches!(err, BrokerError::Platform(_)));
    }
}
