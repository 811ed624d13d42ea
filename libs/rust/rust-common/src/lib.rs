//! Plumbing shared by the credential libraries and the agent binary.
//!
//! Retry classification and backoff, call deadlines, log setup and
//! cooperative shutdown live here so the Vault client stays focused on
//! the credential lifecycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod deadline;
pub mod error;
pub mod retry;
pub mod shutdown;
pub mod tracing_config;

pub use deadline::with_deadline;
pub use error::{PlatformError, Retryable};
pub use retry::{RetryConfig, RetryPolicy};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal, wait_for_signal};
pub use tracing_config::{LogFormat, TracingConfig, init_tracing};
