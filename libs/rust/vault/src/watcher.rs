//! Background token renewal.
//!
//! A [`RenewalWatcher`] turns one renewable [`Session`] into a supervised
//! task that renews the token before its lease runs out and reports every
//! result as a [`RenewalOutcome`]. `Renewed` re-arms the watch; `Expired` and
//! `Failed` are terminal and tell the caller to log in again. The task is
//! aborted when its [`WatchHandle`] is stopped or dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_common::with_deadline;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::config::bounded_threshold;
use crate::error::{BrokerError, WatcherError};
use crate::secrets::{LeaseInfo, Session};

/// Result of one renewal attempt.
#[derive(Debug)]
pub enum RenewalOutcome {
    /// Lease extended, watching continues
    Renewed(LeaseInfo),
    /// Lease can no longer be extended (max TTL reached or renewal disabled)
    Expired,
    /// Renewal failed
    Failed(WatcherError),
}

impl RenewalOutcome {
    /// Whether the watch is over after this outcome.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Renewed(_))
    }
}

/// Lifecycle of a [`WatchHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Renewal task armed
    Watching,
    /// Ended with [`RenewalOutcome::Expired`]
    ExpiredNoRenewal,
    /// Ended with [`RenewalOutcome::Failed`]
    Failed,
}

/// Renewal timing.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Increment requested on each renewal
    pub increment: Duration,
    /// Fraction of the lease left when renewal fires; leases at or below
    /// this fraction of the first lease count as exhausted
    pub renewal_threshold: f64,
    /// Deadline for each renewal call
    pub timeout: Duration,
}

impl WatcherConfig {
    /// Sleep before renewing a lease of length `lease`.
    #[must_use]
    pub fn renew_after(&self, lease: Duration) -> Duration {
        lease.mul_f64(1.0 - bounded_threshold(self.renewal_threshold))
    }

    /// Safety margin below which a lease is treated as exhausted.
    #[must_use]
    pub fn grace(&self, lease: Duration) -> Duration {
        lease.mul_f64(bounded_threshold(self.renewal_threshold))
    }
}

/// Spawns renewal tasks for renewable sessions.
pub struct RenewalWatcher<B> {
    broker: Arc<B>,
    config: WatcherConfig,
}

impl<B: Broker> RenewalWatcher<B> {
    /// Create a watcher using `broker` for renew calls.
    pub const fn new(broker: Arc<B>, config: WatcherConfig) -> Self {
        Self { broker, config }
    }

    /// Start renewing `session` in the background.
    ///
    /// # Errors
    ///
    /// [`WatcherError::NotRenewable`] or [`WatcherError::NoLease`] when there
    /// is nothing the watcher could renew.
    pub fn watch(&self, session: &Session) -> Result<WatchHandle, WatcherError> {
        if !session.renewable {
            return Err(WatcherError::NotRenewable(session.id));
        }
        if session.lease_duration.is_zero() {
            return Err(WatcherError::NoLease(session.id));
        }

        let (tx, outcomes) = mpsc::channel(8);
        let task = tokio::spawn(
            renew_loop(
                Arc::clone(&self.broker),
                session.token.clone(),
                session.lease_duration,
                self.config.clone(),
                tx,
            )
            .instrument(info_span!("renewal_watcher", session = %session.id)),
        );

        debug!(
            session = %session.id,
            increment_secs = self.config.increment.as_secs(),
            "Renewal watcher started"
        );

        Ok(WatchHandle {
            session_id: session.id,
            outcomes,
            task,
            state: WatchState::Watching,
        })
    }
}

async fn renew_loop<B: Broker>(
    broker: Arc<B>,
    token: SecretString,
    mut lease: Duration,
    config: WatcherConfig,
    tx: mpsc::Sender<RenewalOutcome>,
) {
    let grace = config.grace(lease);

    let terminal = loop {
        tokio::time::sleep(config.renew_after(lease)).await;

        let result = with_deadline(
            config.timeout,
            "vault token renewal",
            broker.renew_self(&token, config.increment),
        )
        .await
        .map_err(BrokerError::from);

        let grant = match result {
            Ok(Ok(Some(grant))) => grant,
            Ok(Ok(None)) => break RenewalOutcome::Failed(WatcherError::NoAuthInfo),
            Ok(Err(e)) | Err(e) => break RenewalOutcome::Failed(WatcherError::Renewal(e)),
        };

        let exhausted = !grant.renewable || grant.lease_duration <= grace;
        lease = grant.lease_duration;
        let info = LeaseInfo {
            lease_duration: grant.lease_duration,
            renewable: grant.renewable,
            renewed_at: Utc::now(),
        };
        if tx.send(RenewalOutcome::Renewed(info)).await.is_err() {
            return;
        }

        if exhausted {
            info!(ttl_secs = lease.as_secs(), "Token lease can no longer be extended");
            break RenewalOutcome::Expired;
        }
    };

    if let RenewalOutcome::Failed(e) = &terminal {
        warn!(error = %e, "Token renewal failed");
    }
    let _ = tx.send(terminal).await;
}

/// Owner of one running renewal task.
#[derive(Debug)]
pub struct WatchHandle {
    session_id: Uuid,
    outcomes: mpsc::Receiver<RenewalOutcome>,
    task: JoinHandle<()>,
    state: WatchState,
}

impl WatchHandle {
    /// Wait for the next renewal outcome. Cancel safe.
    ///
    /// After a terminal outcome every further call reports
    /// [`WatcherError::Stopped`].
    pub async fn next_outcome(&mut self) -> RenewalOutcome {
        let outcome = self
            .outcomes
            .recv()
            .await
            .unwrap_or(RenewalOutcome::Failed(WatcherError::Stopped));

        self.state = match &outcome {
            RenewalOutcome::Renewed(_) => WatchState::Watching,
            RenewalOutcome::Expired => WatchState::ExpiredNoRenewal,
            RenewalOutcome::Failed(_) => WatchState::Failed,
        };
        outcome
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> WatchState {
        self.state
    }

    /// Session being renewed.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Abort the renewal task and wait until it is gone.
    pub async fn stop(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        debug!(session = %self.session_id, "Renewal watcher stopped");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f64) -> WatcherConfig {
        WatcherConfig {
            increment: Duration::from_secs(3600),
            renewal_threshold: threshold,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_renew_after_leaves_threshold() {
        let config = config(0.2);
        assert_eq!(config.renew_after(Duration::from_secs(100)), Duration::from_secs(80));
        assert_eq!(config.grace(Duration::from_secs(100)), Duration::from_secs(20));
    }

    #[test]
    fn test_nan_threshold_uses_default_timing() {
        let config = config(f64::NAN);
        assert_eq!(config.renew_after(Duration::from_secs(100)), Duration::from_secs(80));
        assert_eq!(config.grace(Duration::from_secs(100)), Duration::from_secs(20));
    }

    #[test]
    fn test_terminal_outcomes() {
        assert!(RenewalOutcome::Expired.is_terminal());
        assert!(RenewalOutcome::Failed(WatcherError::Stopped).is_terminal());
        assert!(
            !RenewalOutcome::Renewed(LeaseInfo {
                lease_duration: Duration::from_secs(1),
                renewable: true,
                renewed_at: Utc::now(),
            })
            .is_terminal()
        );
    }
}
