//! Credential lifecycle loop.
//!
//! [`LifecycleManager`] owns the active [`Session`] and drives
//! login → secret read → renewal watch, looping back to login whenever the
//! session can no longer be kept alive. The host reads the latest
//! [`Credential`] and lifecycle events through a [`CredentialHandle`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_common::{RetryPolicy, Retryable, ShutdownSignal};
use secrecy::SecretString;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthClient;
use crate::broker::Broker;
use crate::config::{NonRenewablePolicy, VaultConfig, bounded_threshold};
use crate::error::{AuthError, LifecycleError, SecretError, WatcherError};
use crate::fetcher::{FetchedSecret, SecretFetcher, SecretTarget};
use crate::secrets::{Identity, Session};
use crate::watcher::{RenewalOutcome, RenewalWatcher, WatcherConfig};

const EVENT_CAPACITY: usize = 64;

/// Observable lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A login (or pre-issued token lookup) produced a new active session
    Authenticated {
        /// Session identifier
        session_id: Uuid,
        /// Whether the token can be renewed
        renewable: bool,
        /// Granted lease
        lease: Duration,
    },
    /// A fresh credential is available to the host
    CredentialPublished {
        /// Session that read it
        session_id: Uuid,
        /// TTL of the secret itself
        secret_ttl: Duration,
    },
    /// Background renewal started for a session
    WatchStarted {
        /// Session being renewed
        session_id: Uuid,
    },
    /// Session lease extended
    Renewed {
        /// Session renewed
        session_id: Uuid,
        /// New lease
        lease: Duration,
    },
    /// Session is not renewable; the configured policy applies
    NonRenewable {
        /// Session concerned
        session_id: Uuid,
        /// Policy in force
        policy: NonRenewablePolicy,
    },
    /// Session is renewable but carries no lease; it is kept until a host
    /// refresh or shutdown
    NoLease {
        /// Session concerned
        session_id: Uuid,
    },
    /// Login will be attempted again after `delay`
    Reauthenticating {
        /// Why the previous session was abandoned
        reason: String,
        /// Backoff before the next login
        delay: Duration,
    },
    /// The secret does not have the expected shape
    SecretError {
        /// Error description
        message: String,
    },
    /// The loop stopped on an unrecoverable error
    Fatal {
        /// Error description
        message: String,
    },
    /// The loop stopped after shutdown
    Stopped,
}

/// Latest credential handed to the host.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Secret field value
    pub value: SecretString,
    /// TTL of the secret, zero when none applies
    pub secret_ttl: Duration,
    /// Session that read the secret
    pub session_id: Uuid,
    /// When it was read
    pub fetched_at: DateTime<Utc>,
}

/// Host-side view of a running [`LifecycleManager`].
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    credential: watch::Receiver<Option<Credential>>,
    refresh: mpsc::Sender<()>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl CredentialHandle {
    /// Latest published credential.
    #[must_use]
    pub fn current(&self) -> Option<Credential> {
        self.credential.borrow().clone()
    }

    /// Wait for the next published credential. `None` once the manager is
    /// gone.
    pub async fn changed(&mut self) -> Option<Credential> {
        self.credential.changed().await.ok()?;
        self.credential.borrow_and_update().clone()
    }

    /// Ask the manager to read the secret again. Returns `false` when a
    /// refresh is already pending.
    #[must_use]
    pub fn request_refresh(&self) -> bool {
        self.refresh.try_send(()).is_ok()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}

/// How a session cycle ended.
#[derive(Debug)]
enum Cycle {
    Shutdown,
    /// Log in again right away
    Reauthenticate(String),
    /// Log in again after backoff
    Retry(String),
    /// Renewal gave up on the session; backoff grows with each loss in a row
    RenewalLost(String),
}

/// Keeps one Vault login alive and the downstream credential fresh.
pub struct LifecycleManager<B> {
    identity: Identity,
    target: SecretTarget,
    auth: AuthClient<B>,
    fetcher: SecretFetcher<B>,
    watcher: RenewalWatcher<B>,
    retry: RetryPolicy,
    renewal_failures: u32,
    non_renewable: NonRenewablePolicy,
    renewal_threshold: f64,
    initial_token: Option<SecretString>,
    session: Option<Session>,
    credential_tx: watch::Sender<Option<Credential>>,
    events: broadcast::Sender<LifecycleEvent>,
    refresh_tx: mpsc::Sender<()>,
    refresh_rx: mpsc::Receiver<()>,
}

impl<B: Broker> LifecycleManager<B> {
    /// Build a manager from `config`, sharing `broker` between its parts.
    pub fn new(broker: Arc<B>, config: &VaultConfig) -> Self {
        let (credential_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let renewal_threshold = bounded_threshold(config.renewal_threshold);

        Self {
            identity: config.identity(),
            target: SecretTarget {
                mount: config.kv_mount.clone(),
                path: config.secret_path.clone(),
                field: config.secret_field.clone(),
            },
            auth: AuthClient::new(Arc::clone(&broker), config.timeout),
            fetcher: SecretFetcher::new(Arc::clone(&broker), config.timeout),
            watcher: RenewalWatcher::new(
                broker,
                WatcherConfig {
                    increment: config.renew_increment,
                    renewal_threshold,
                    timeout: config.timeout,
                },
            ),
            retry: RetryPolicy::new(config.retry.clone()),
            renewal_failures: 0,
            non_renewable: config.non_renewable,
            renewal_threshold,
            initial_token: config.token.clone(),
            session: None,
            credential_tx,
            events,
            refresh_tx,
            refresh_rx,
        }
    }

    /// Replace the retry policy used between failed cycles.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Handle for the host process.
    #[must_use]
    pub fn handle(&self) -> CredentialHandle {
        CredentialHandle {
            credential: self.credential_tx.subscribe(),
            refresh: self.refresh_tx.clone(),
            events: self.events.clone(),
        }
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// The active session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Run until `shutdown` fires or an unrecoverable error occurs.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Fatal`] when the identity proof cannot be built,
    /// [`LifecycleError::RetriesExhausted`] when a bounded retry policy runs
    /// out. Every other failure loops back to login.
    #[instrument(skip_all, fields(role = %self.identity.role, secret = %self.target.location()))]
    pub async fn run(&mut self, mut shutdown: ShutdownSignal) -> Result<(), LifecycleError> {
        let mut failures: u32 = 0;
        info!(max_retries = ?self.retry.max_retries(), "Starting credential lifecycle");

        while !shutdown.is_shutdown() {
            let login = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                login = self.authenticate() => login,
            };

            let next = match login {
                Ok(session) => {
                    self.install(session);
                    self.serve_session(&mut shutdown, &mut failures).await
                }
                Err(e) if e.is_fatal() => return Err(self.fail(LifecycleError::Fatal(e))),
                Err(e) => {
                    warn!(error = %e, "Vault login failed");
                    Cycle::Retry(e.to_string())
                }
            };

            match next {
                Cycle::Shutdown => break,
                Cycle::Reauthenticate(reason) => {
                    info!(%reason, "Re-attempting login");
                    self.emit(LifecycleEvent::Reauthenticating {
                        reason,
                        delay: Duration::ZERO,
                    });
                }
                Cycle::RenewalLost(reason) => {
                    let delay = self
                        .renewal_failures
                        .checked_sub(1)
                        .map_or(Duration::ZERO, |attempt| self.retry.delay_for_attempt(attempt));
                    self.renewal_failures = self.renewal_failures.saturating_add(1);
                    warn!(
                        %reason,
                        in_a_row = self.renewal_failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Session lost, logging in again"
                    );
                    self.emit(LifecycleEvent::Reauthenticating { reason, delay });

                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            () = shutdown.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Cycle::Retry(reason) => {
                    if !self.retry.has_attempts_left(failures) {
                        return Err(self.fail(LifecycleError::RetriesExhausted {
                            attempts: failures,
                            last: reason,
                        }));
                    }
                    let delay = self.retry.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        %reason,
                        attempt = failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Backing off before next login"
                    );
                    self.emit(LifecycleEvent::Reauthenticating { reason, delay });

                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.session = None;
        info!("Credential lifecycle stopped");
        self.emit(LifecycleEvent::Stopped);
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<Session, AuthError> {
        if let Some(token) = self.initial_token.take() {
            match self.auth.resume(&token).await {
                Ok(session) => return Ok(session),
                Err(e) => warn!(error = %e, "Pre-issued token unusable, falling back to login"),
            }
        }
        self.auth.login(&self.identity).await
    }

    /// Make `session` the only active one.
    fn install(&mut self, session: Session) {
        if let Some(previous) = self.session.replace(session) {
            debug!(session = %previous.id, "Session superseded");
        }
        if let Some(session) = &self.session {
            info!(
                session = %session.id,
                renewable = session.renewable,
                expires_at = ?session.expires_at(),
                "Vault session active"
            );
            self.emit(LifecycleEvent::Authenticated {
                session_id: session.id,
                renewable: session.renewable,
                lease: session.lease_duration,
            });
        }
    }

    async fn serve_session(&mut self, shutdown: &mut ShutdownSignal, failures: &mut u32) -> Cycle {
        let Some(session) = self.session.clone() else {
            return Cycle::Retry("no active session".to_string());
        };

        let fetched = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Cycle::Shutdown,
            fetched = self.fetcher.fetch(&session, &self.target) => fetched,
        };

        let secret_ttl = match fetched {
            Ok(secret) => {
                *failures = 0;
                let ttl = secret.ttl;
                self.publish(&session, secret);
                ttl
            }
            Err(e) if !e.is_retryable() => {
                self.report_secret_error(&e);
                return self.hold(shutdown, None, "secret unusable").await;
            }
            Err(e) => {
                warn!(error = %e, "Secret read failed");
                return Cycle::Retry(e.to_string());
            }
        };

        if !secret_ttl.is_zero() {
            let due = secret_ttl.mul_f64(1.0 - self.renewal_threshold);
            debug!(due_secs = due.as_secs(), "Secret has its own TTL, re-reading when due");
            return self.hold(shutdown, Some(due), "secret TTL elapsed").await;
        }
        if !session.renewable {
            return self.hold_non_renewable(&session, shutdown).await;
        }
        self.watch(&session, shutdown).await
    }

    async fn watch(&mut self, session: &Session, shutdown: &mut ShutdownSignal) -> Cycle {
        let mut handle = match self.watcher.watch(session) {
            Ok(handle) => handle,
            Err(WatcherError::NoLease(session_id)) => {
                info!(session = %session_id, "Token has no lease, nothing to renew");
                self.emit(LifecycleEvent::NoLease { session_id });
                return self.hold(shutdown, None, "session without lease").await;
            }
            Err(e) => {
                info!(error = %e, "Session cannot be watched");
                return self.hold_non_renewable(session, shutdown).await;
            }
        };
        self.emit(LifecycleEvent::WatchStarted {
            session_id: handle.session_id(),
        });

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    handle.stop().await;
                    return Cycle::Shutdown;
                }
                Some(()) = self.refresh_rx.recv() => {
                    if let Some(cycle) = self.refetch(shutdown).await {
                        handle.stop().await;
                        return cycle;
                    }
                }
                outcome = handle.next_outcome() => match outcome {
                    RenewalOutcome::Renewed(lease) => {
                        if let Some(current) = &self.session {
                            let renewed = current.renewed(&lease);
                            self.renewal_failures = 0;
                            info!(
                                session = %handle.session_id(),
                                ttl_secs = lease.lease_duration.as_secs(),
                                "Successfully renewed token"
                            );
                            self.emit(LifecycleEvent::Renewed {
                                session_id: renewed.id,
                                lease: lease.lease_duration,
                            });
                            self.session = Some(renewed);
                        }
                    }
                    RenewalOutcome::Expired => {
                        handle.stop().await;
                        return Cycle::RenewalLost("token can no longer be renewed".to_string());
                    }
                    RenewalOutcome::Failed(e) => {
                        handle.stop().await;
                        return Cycle::RenewalLost(format!("token renewal failed: {e}"));
                    }
                },
            }
        }
    }

    /// Host-requested re-read with the active session. `Some` ends the cycle.
    async fn refetch(&mut self, shutdown: &mut ShutdownSignal) -> Option<Cycle> {
        let Some(session) = self.session.clone() else {
            return Some(Cycle::Retry("no active session".to_string()));
        };
        debug!(session = %session.id, "Refresh requested by host");

        let fetched = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Some(Cycle::Shutdown),
            fetched = self.fetcher.fetch(&session, &self.target) => fetched,
        };

        match fetched {
            Ok(secret) => {
                self.publish(&session, secret);
                None
            }
            Err(e) if !e.is_retryable() => {
                self.report_secret_error(&e);
                None
            }
            Err(e) => {
                warn!(error = %e, "Secret re-read failed");
                Some(Cycle::Retry(e.to_string()))
            }
        }
    }

    async fn hold_non_renewable(&mut self, session: &Session, shutdown: &mut ShutdownSignal) -> Cycle {
        self.emit(LifecycleEvent::NonRenewable {
            session_id: session.id,
            policy: self.non_renewable,
        });

        let due = match self.non_renewable {
            NonRenewablePolicy::ReauthenticateBeforeExpiry if !session.lease_duration.is_zero() => {
                Some(session.lease_duration.mul_f64(1.0 - self.renewal_threshold))
            }
            NonRenewablePolicy::ReauthenticateEvery(interval) => Some(interval),
            NonRenewablePolicy::ReauthenticateBeforeExpiry
            | NonRenewablePolicy::KeepForProcessLifetime => None,
        };
        info!(
            session = %session.id,
            policy = ?self.non_renewable,
            due_secs = due.map(|d| d.as_secs()),
            "Token is not renewable"
        );

        self.hold(shutdown, due, "non-renewable session due for re-authentication")
            .await
    }

    /// Keep the current credential until `due`, a host refresh or shutdown.
    async fn hold(
        &mut self,
        shutdown: &mut ShutdownSignal,
        due: Option<Duration>,
        reason: &str,
    ) -> Cycle {
        let elapsed = async {
            match due {
                Some(due) => tokio::time::sleep(due).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = shutdown.cancelled() => Cycle::Shutdown,
            Some(()) = self.refresh_rx.recv() => {
                Cycle::Reauthenticate("refresh requested by host".to_string())
            }
            () = elapsed => Cycle::Reauthenticate(reason.to_string()),
        }
    }

    fn publish(&self, session: &Session, secret: FetchedSecret) {
        let secret_ttl = secret.ttl;
        self.credential_tx.send_replace(Some(Credential {
            value: secret.value,
            secret_ttl,
            session_id: session.id,
            fetched_at: Utc::now(),
        }));
        info!(session = %session.id, ttl_secs = secret_ttl.as_secs(), "Credential published");
        self.emit(LifecycleEvent::CredentialPublished {
            session_id: session.id,
            secret_ttl,
        });
    }

    fn report_secret_error(&self, e: &SecretError) {
        error!(error = %e, "Secret cannot be used as configured");
        self.emit(LifecycleEvent::SecretError {
            message: e.to_string(),
        });
    }

    fn fail(&mut self, e: LifecycleError) -> LifecycleError {
        error!(error = %e, "Credential lifecycle cannot continue");
        self.session = None;
        self.emit(LifecycleEvent::Fatal {
            message: e.to_string(),
        });
        e
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }
}
