//! Kubernetes login against Vault.

use std::sync::Arc;
use std::time::Duration;

use rust_common::with_deadline;
use secrecy::SecretString;
use tracing::{info, instrument};

use crate::broker::Broker;
use crate::error::{AuthError, BrokerError};
use crate::secrets::{Identity, IdentityProof, Session};

/// Performs one login exchange per call. Retrying is the caller's job.
pub struct AuthClient<B> {
    broker: Arc<B>,
    timeout: Duration,
}

impl<B: Broker> AuthClient<B> {
    /// Create a client whose broker calls are bounded by `timeout`.
    pub const fn new(broker: Arc<B>, timeout: Duration) -> Self {
        Self { broker, timeout }
    }

    /// Log in with the service account token of `identity`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InitFailure`] when the token file is unreadable or empty
    /// - [`AuthError::LoginRejected`] when Vault refuses or cannot be reached
    /// - [`AuthError::NoAuthInfo`] when Vault answers without an auth block
    #[instrument(skip(self, identity), fields(role = %identity.role, mount = %identity.auth_mount))]
    pub async fn login(&self, identity: &Identity) -> Result<Session, AuthError> {
        let proof = build_proof(identity).await?;

        let grant = with_deadline(
            self.timeout,
            "vault login",
            self.broker.login(&identity.auth_mount, &proof),
        )
        .await
        .map_err(|e| AuthError::LoginRejected(BrokerError::from(e)))?
        .map_err(AuthError::LoginRejected)?
        .ok_or(AuthError::NoAuthInfo)?;

        let session = Session::from_grant(grant);
        info!(
            session = %session.id,
            accessor = %session.accessor,
            renewable = session.renewable,
            ttl_secs = session.lease_duration.as_secs(),
            "Authenticated with Vault"
        );
        Ok(session)
    }

    /// Adopt a pre-issued token after checking it with Vault.
    ///
    /// # Errors
    ///
    /// [`AuthError::LoginRejected`] when the token is unknown or Vault is
    /// unreachable, [`AuthError::NoAuthInfo`] when lookup returns no data.
    #[instrument(skip_all)]
    pub async fn resume(&self, token: &SecretString) -> Result<Session, AuthError> {
        let grant = with_deadline(self.timeout, "vault token lookup", self.broker.lookup_self(token))
            .await
            .map_err(|e| AuthError::LoginRejected(BrokerError::from(e)))?
            .map_err(AuthError::LoginRejected)?
            .ok_or(AuthError::NoAuthInfo)?;

        let session = Session::from_grant(grant);
        info!(
            session = %session.id,
            renewable = session.renewable,
            ttl_secs = session.lease_duration.as_secs(),
            "Using pre-issued Vault token"
        );
        Ok(session)
    }
}

async fn build_proof(identity: &Identity) -> Result<IdentityProof, AuthError> {
    let jwt = tokio::fs::read_to_string(&identity.token_path)
        .await
        .map_err(|e| {
            AuthError::InitFailure(format!(
                "reading service account token {}: {e}",
                identity.token_path.display()
            ))
        })?;

    let jwt = jwt.trim();
    if jwt.is_empty() {
        return Err(AuthError::InitFailure(format!(
            "service account token {} is empty",
            identity.token_path.display()
        )));
    }

    Ok(IdentityProof {
        role: identity.role.clone(),
        jwt: SecretString::from(jwt),
    })
}
