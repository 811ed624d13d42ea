//! Secrets broker abstraction.
//!
//! The lifecycle components only talk to Vault through this trait, which
//! keeps transport details in [`HttpBroker`](crate::client::HttpBroker) and
//! lets tests script broker behaviour.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::VaultResult;
use crate::secrets::{AuthGrant, IdentityProof, SecretRecord};

/// Broker operations needed to keep one login alive and read one secret.
///
/// `Ok(None)` from the auth calls means Vault answered successfully but sent
/// no auth block.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Log in at `auth/{mount}/login`.
    async fn login(&self, mount: &str, proof: &IdentityProof) -> VaultResult<Option<AuthGrant>>;

    /// Describe an existing token.
    async fn lookup_self(&self, token: &SecretString) -> VaultResult<Option<AuthGrant>>;

    /// Extend the token lease by `increment`.
    async fn renew_self(
        &self,
        token: &SecretString,
        increment: Duration,
    ) -> VaultResult<Option<AuthGrant>>;

    /// Read a KV v2 secret.
    async fn read_secret(
        &self,
        token: &SecretString,
        mount: &str,
        path: &str,
    ) -> VaultResult<SecretRecord>;
}
