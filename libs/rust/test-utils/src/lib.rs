//! Shared test utilities for auth-platform Rust libraries.
//!
//! This crate provides:
//! - A scripted Vault broker that records every call
//! - Proptest generators for broker responses
//! - Test fixtures with sample Vault payloads

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
pub use mocks::{BrokerCall, ScriptedBroker};
