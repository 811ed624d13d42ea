//! Platform error shared by the libraries.
//!
//! Library-specific error enums wrap [`PlatformError`] and implement
//! [`Retryable`] so a control loop can tell transient failures from those
//! that need an operator.

use std::time::Duration;

use thiserror::Error;

/// Classification shared by every error type a control loop may retry.
pub trait Retryable {
    /// Whether the failure is transient and the operation may succeed later.
    fn is_retryable(&self) -> bool;
}

/// Failures raised by the shared plumbing rather than by a dependency's API.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PlatformError {
    /// A call ran past its deadline
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    DeadlineExceeded {
        /// Name of the abandoned call
        operation: String,
        /// Deadline that elapsed
        after: Duration,
    },
}

impl PlatformError {
    /// Deadline error for `operation`.
    #[must_use]
    pub fn deadline_exceeded(operation: impl Into<String>, after: Duration) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            after,
        }
    }
}

/// ```
/// use std::time::Duration;
/// use rust_common::{PlatformError, Retryable};
///
/// assert!(PlatformError::deadline_exceeded("vault login", Duration::from_secs(10)).is_retryable());
/// ```
impl Retryable for PlatformError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}
