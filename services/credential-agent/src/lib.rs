//! Credential agent library.
//!
//! Keeps a Vault-issued database password fresh for a Kubernetes workload.
//! The binary in `main.rs` only loads configuration, installs tracing and
//! hands control to [`Agent::run`].

#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod database;

pub use agent::Agent;
pub use config::{AgentConfig, ConfigError};
pub use database::{DatabaseTarget, Dsn};
