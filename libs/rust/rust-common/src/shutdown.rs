//! Cooperative shutdown for long-running loops.
//!
//! A [`ShutdownCoordinator`] owns the background workers of a process and
//! hands out [`ShutdownSignal`]s; loops race their work against
//! [`ShutdownSignal::cancelled`] and return on their own.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Owns tracked workers and the stop flag they observe.
pub struct ShutdownCoordinator {
    stop_tx: watch::Sender<bool>,
    workers: JoinSet<()>,
}

impl ShutdownCoordinator {
    /// Coordinator with no workers and the flag lowered.
    #[must_use]
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            workers: JoinSet::new(),
        }
    }

    /// New handle on the stop flag.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            stop_rx: self.stop_tx.subscribe(),
        }
    }

    /// Track `worker` until [`shutdown`](Self::shutdown).
    ///
    /// Workers must watch their own signal; stragglers are aborted once the
    /// shutdown grace period runs out.
    pub fn spawn<F>(&mut self, name: &'static str, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.spawn(async move {
            worker.await;
            debug!(worker = name, "Worker finished");
        });
    }

    /// Raise the stop flag without waiting on anyone.
    pub fn trigger(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Raise the stop flag and join every worker within `grace`.
    pub async fn shutdown(mut self, grace: Duration) {
        self.trigger();
        info!(workers = self.workers.len(), "Stopping background workers");

        let joined = tokio::time::timeout(grace, async {
            while let Some(outcome) = self.workers.join_next().await {
                if let Err(e) = outcome {
                    warn!(error = %e, "Worker ended abnormally");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Workers outlived the grace period, aborting"
            );
            self.workers.abort_all();
        }
        info!("Background workers stopped");
    }

    /// Workers not yet joined.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.workers.len()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the stop flag.
///
/// Clones observe the same flag. Dropping the coordinator counts as a stop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    stop_rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once the flag is raised or the coordinator is gone.
    pub async fn cancelled(&mut self) {
        let _ = self.stop_rx.wait_for(|stop| *stop).await;
    }

    /// Non-blocking check of the flag.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err()
    }
}

/// Resolves on the first SIGINT or SIGTERM.
///
/// # Errors
///
/// Fails when a signal handler cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        let mut sigterm = unix_signal(SignalKind::terminate())?;
        let name = tokio::select! {
            interrupted = signal::ctrl_c() => {
                interrupted?;
                "SIGINT"
            }
            _ = sigterm.recv() => "SIGTERM",
        };
        info!(signal = name, "Stop requested");
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!(signal = "ctrl-c", "Stop requested");
    }

    Ok(())
}
