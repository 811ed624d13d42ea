//! Single secret read with a typed field accessor.

use std::sync::Arc;
use std::time::Duration;

use rust_common::with_deadline;
use secrecy::SecretString;
use tracing::{debug, instrument};

use crate::broker::Broker;
use crate::error::{BrokerError, SecretError};
use crate::secrets::Session;

/// Where the downstream credential lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretTarget {
    /// KV v2 mount
    pub mount: String,
    /// Path inside the mount
    pub path: String,
    /// Field to extract
    pub field: String,
}

impl SecretTarget {
    /// Human readable location, used in errors and logs.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}/{}", self.mount, self.path)
    }
}

/// A fetched credential value together with the secret's own TTL.
#[derive(Debug, Clone)]
pub struct FetchedSecret {
    /// Field value
    pub value: SecretString,
    /// Zero when no fixed TTL governs the secret
    pub ttl: Duration,
}

/// Reads one secret per call with the active session.
pub struct SecretFetcher<B> {
    broker: Arc<B>,
    timeout: Duration,
}

impl<B: Broker> SecretFetcher<B> {
    /// Create a fetcher whose reads are bounded by `timeout`.
    pub const fn new(broker: Arc<B>, timeout: Duration) -> Self {
        Self { broker, timeout }
    }

    /// Read `target` and extract its field.
    ///
    /// # Errors
    ///
    /// [`SecretError::FieldMissingOrWrongType`] for a shape mismatch,
    /// [`SecretError::Read`] when the read itself failed.
    #[instrument(skip(self, session), fields(session = %session.id, path = %target.location()))]
    pub async fn fetch(
        &self,
        session: &Session,
        target: &SecretTarget,
    ) -> Result<FetchedSecret, SecretError> {
        let record = with_deadline(
            self.timeout,
            "vault secret read",
            self.broker
                .read_secret(&session.token, &target.mount, &target.path),
        )
        .await
        .map_err(BrokerError::from)??;

        let value = record.string_field(&target.location(), &target.field)?;
        debug!(ttl_secs = record.ttl.as_secs(), version = ?record.version, "Secret read");

        Ok(FetchedSecret {
            value,
            ttl: record.ttl,
        })
    }
}
