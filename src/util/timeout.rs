//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::auth::error::AuthError;

/// Wrap a future with a timeout.
///
/// An elapsed deadline surfaces as [`AuthError::Timeout`]; the wrapped future
/// is dropped, so no partial result escapes.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, AuthError>>,
) -> Result<T, AuthError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout {
            millis: duration.as_millis() as u64,
        }),
    }
}
