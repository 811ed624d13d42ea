//! Deadlines for outbound calls.

use std::future::Future;
use std::time::Duration;

use crate::PlatformError;

/// Run `future` to completion or fail with [`PlatformError::DeadlineExceeded`] once
/// `limit` has elapsed.
///
/// # Errors
///
/// Returns `PlatformError::DeadlineExceeded` naming `operation` when the deadline passes
/// first. The future is dropped in that case.
pub async fn with_deadline<F, T>(limit: Duration, operation: &str, future: F) -> Result<T, PlatformError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| PlatformError::deadline_exceeded(operation, limit))
}
