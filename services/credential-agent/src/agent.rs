//! Wires the credential lifecycle to the process.
//!
//! The agent runs a [`LifecycleManager`] until a stop signal arrives or the
//! manager gives up, logs every lifecycle event and turns each published
//! credential into a database [`Dsn`].

use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use auth_vault_client::{Broker, CredentialHandle, LifecycleEvent, LifecycleManager};
use rust_common::{ShutdownCoordinator, ShutdownSignal};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::database::{DatabaseTarget, Dsn};

/// Credential agent for one workload.
pub struct Agent<B> {
    config: AgentConfig,
    manager: LifecycleManager<B>,
    dsn_tx: watch::Sender<Option<Dsn>>,
}

impl<B: Broker> Agent<B> {
    /// Create an agent talking to Vault through `broker`.
    pub fn new(broker: Arc<B>, config: AgentConfig) -> Self {
        let manager = LifecycleManager::new(broker, &config.vault);
        let (dsn_tx, _) = watch::channel(None);
        Self {
            config,
            manager,
            dsn_tx,
        }
    }

    /// Latest database DSN, updated on every published credential.
    #[must_use]
    pub fn database(&self) -> watch::Receiver<Option<Dsn>> {
        self.dsn_tx.subscribe()
    }

    /// Handle to the underlying lifecycle.
    #[must_use]
    pub fn credentials(&self) -> CredentialHandle {
        self.manager.handle()
    }

    /// Run until `stop` completes or the lifecycle ends on its own.
    ///
    /// # Errors
    ///
    /// Returns the lifecycle error when the manager stopped on a fatal
    /// failure or ran out of retries.
    pub async fn run<S>(self, stop: S) -> anyhow::Result<()>
    where
        S: Future<Output = io::Result<()>>,
    {
        let Self {
            config,
            mut manager,
            dsn_tx,
        } = self;

        let mut coordinator = ShutdownCoordinator::new();
        let handle = manager.handle();
        coordinator.spawn(
            "lifecycle-events",
            log_events(handle.subscribe(), coordinator.subscribe()),
        );
        coordinator.spawn(
            "database-target",
            track_database(handle, config.database.clone(), dsn_tx, coordinator.subscribe()),
        );
        debug!(workers = coordinator.task_count(), "Agent workers started");

        let signal = coordinator.subscribe();
        let mut lifecycle = tokio::spawn(async move { manager.run(signal).await });

        let finished = tokio::select! {
            joined = &mut lifecycle => Some(joined),
            stopped = stop => {
                if let Err(e) = stopped {
                    warn!(error = %e, "Signal handling failed, shutting down");
                }
                None
            }
        };

        coordinator.trigger();
        let joined = match finished {
            Some(joined) => joined,
            None => match tokio::time::timeout(config.shutdown_timeout, &mut lifecycle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Credential lifecycle did not stop in time, aborting");
                    lifecycle.abort();
                    Ok(Ok(()))
                }
            },
        };
        coordinator.shutdown(config.shutdown_timeout).await;

        joined
            .context("credential lifecycle task panicked")?
            .context("credential lifecycle stopped")
    }
}

async fn log_events(mut events: broadcast::Receiver<LifecycleEvent>, mut shutdown: ShutdownSignal) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(LifecycleEvent::Fatal { message }) => error!(%message, "Lifecycle failed"),
            Ok(LifecycleEvent::SecretError { message }) => {
                error!(%message, "Secret cannot be used, waiting for a fix");
            }
            Ok(LifecycleEvent::Stopped) => {
                info!("Lifecycle stopped");
                return;
            }
            Ok(event) => info!(?event, "Lifecycle event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Lifecycle events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn track_database(
    mut handle: CredentialHandle,
    target: DatabaseTarget,
    dsn_tx: watch::Sender<Option<Dsn>>,
    mut shutdown: ShutdownSignal,
) {
    if let Some(credential) = handle.current() {
        dsn_tx.send_replace(Some(target.dsn(credential.value)));
    }

    loop {
        let credential = tokio::select! {
            () = shutdown.cancelled() => return,
            credential = handle.changed() => credential,
        };
        let Some(credential) = credential else {
            return;
        };

        let dsn = target.dsn(credential.value);
        info!(%dsn, session = %credential.session_id, "Database credential updated");
        dsn_tx.send_replace(Some(dsn));
    }
}
