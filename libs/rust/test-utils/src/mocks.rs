//! Mock implementations for testing.
//!
//! [`ScriptedBroker`] answers each broker call from a per-operation queue and
//! records the call. An empty queue never answers, so a test controls exactly
//! how far the lifecycle can progress.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use auth_vault_client::{AuthGrant, Broker, BrokerError, IdentityProof, SecretRecord, VaultResult};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Notify;

/// A recorded broker call. Tokens are exposed so tests can compare them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    /// `auth/{mount}/login`
    Login {
        /// Role in the proof
        role: String,
    },
    /// `auth/token/lookup-self`
    Lookup {
        /// Token looked up
        token: String,
    },
    /// `auth/token/renew-self`
    Renew {
        /// Token renewed
        token: String,
        /// Requested increment
        increment: Duration,
    },
    /// KV v2 read
    Read {
        /// Token used
        token: String,
        /// Secret path
        path: String,
    },
}

impl BrokerCall {
    /// Token carried by the call, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Login { .. } => None,
            Self::Lookup { token } | Self::Renew { token, .. } | Self::Read { token, .. } => {
                Some(token)
            }
        }
    }
}

type Script<T> = Mutex<VecDeque<VaultResult<T>>>;

/// Broker driven by queued responses.
#[derive(Default)]
pub struct ScriptedBroker {
    logins: Script<Option<AuthGrant>>,
    lookups: Script<Option<AuthGrant>>,
    renewals: Script<Option<AuthGrant>>,
    reads: Script<SecretRecord>,
    calls: Mutex<Vec<BrokerCall>>,
    recorded: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn answer<T>(script: &Script<T>) -> VaultResult<T> {
    let next = lock(script).pop_front();
    match next {
        Some(response) => response,
        None => std::future::pending().await,
    }
}

impl ScriptedBroker {
    /// Create a broker with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a login response.
    pub fn push_login(&self, response: VaultResult<Option<AuthGrant>>) -> &Self {
        lock(&self.logins).push_back(response);
        self
    }

    /// Queue a successful login.
    pub fn push_grant(&self, grant: AuthGrant) -> &Self {
        self.push_login(Ok(Some(grant)))
    }

    /// Queue a lookup-self response.
    pub fn push_lookup(&self, response: VaultResult<Option<AuthGrant>>) -> &Self {
        lock(&self.lookups).push_back(response);
        self
    }

    /// Queue a renew-self response.
    pub fn push_renewal(&self, response: VaultResult<Option<AuthGrant>>) -> &Self {
        lock(&self.renewals).push_back(response);
        self
    }

    /// Queue a secret read response.
    pub fn push_read(&self, response: VaultResult<SecretRecord>) -> &Self {
        lock(&self.reads).push_back(response);
        self
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BrokerCall> {
        lock(&self.calls).clone()
    }

    /// Number of logins so far.
    #[must_use]
    pub fn login_count(&self) -> usize {
        self.count(|call| matches!(call, BrokerCall::Login { .. }))
    }

    /// Number of renewals so far.
    #[must_use]
    pub fn renew_count(&self) -> usize {
        self.count(|call| matches!(call, BrokerCall::Renew { .. }))
    }

    /// Number of secret reads so far.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.count(|call| matches!(call, BrokerCall::Read { .. }))
    }

    fn count(&self, predicate: impl Fn(&BrokerCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    /// Wait until at least `n` calls have been recorded.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.recorded.notified();
            if lock(&self.calls).len() >= n {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, call: BrokerCall) {
        lock(&self.calls).push(call);
        self.recorded.notify_waiters();
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn login(&self, _mount: &str, proof: &IdentityProof) -> VaultResult<Option<AuthGrant>> {
        self.record(BrokerCall::Login {
            role: proof.role.clone(),
        });
        answer(&self.logins).await
    }

    async fn lookup_self(&self, token: &SecretString) -> VaultResult<Option<AuthGrant>> {
        self.record(BrokerCall::Lookup {
            token: token.expose_secret().to_string(),
        });
        answer(&self.lookups).await
    }

    async fn renew_self(
        &self,
        token: &SecretString,
        increment: Duration,
    ) -> VaultResult<Option<AuthGrant>> {
        self.record(BrokerCall::Renew {
            token: token.expose_secret().to_string(),
            increment,
        });
        answer(&self.renewals).await
    }

    async fn read_secret(
        &self,
        token: &SecretString,
        _mount: &str,
        path: &str,
    ) -> VaultResult<SecretRecord> {
        self.record(BrokerCall::Read {
            token: token.expose_secret().to_string(),
            path: path.to_string(),
        });
        answer(&self.reads).await
    }
}

/// Error helper for scripts.
#[must_use]
pub fn rejected(message: &str) -> BrokerError {
    BrokerError::rejected(400, message)
}
