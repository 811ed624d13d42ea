//! HashiCorp Vault credential lifecycle for Auth Platform
//!
//! Logs in with the pod's Kubernetes service account, reads the database
//! password from a KV v2 mount, and keeps the Vault token renewed, logging in
//! again whenever renewal stops working.
//!
//! ```no_run
//! use std::sync::Arc;
//! use auth_vault_client::{HttpBroker, LifecycleManager, VaultConfig};
//! use rust_common::ShutdownCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VaultConfig::from_env()?;
//! let broker = Arc::new(HttpBroker::new(&config)?);
//! let mut manager = LifecycleManager::new(broker, &config);
//! let mut handle = manager.handle();
//!
//! let shutdown = ShutdownCoordinator::new();
//! let signal = shutdown.subscribe();
//! tokio::spawn(async move { manager.run(signal).await });
//!
//! if let Some(credential) = handle.changed().await {
//!     println!("credential from session {}", credential.session_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod secrets;
pub mod watcher;

pub use auth::AuthClient;
pub use broker::Broker;
pub use client::HttpBroker;
pub use config::{ConfigError, NonRenewablePolicy, VaultConfig};
pub use error::{AuthError, BrokerError, LifecycleError, SecretError, VaultResult, WatcherError};
pub use fetcher::{FetchedSecret, SecretFetcher, SecretTarget};
pub use lifecycle::{Credential, CredentialHandle, LifecycleEvent, LifecycleManager};
pub use secrets::{AuthGrant, Identity, IdentityProof, LeaseInfo, SecretRecord, Session};
pub use watcher::{RenewalOutcome, RenewalWatcher, WatchHandle, WatchState, WatcherConfig};
