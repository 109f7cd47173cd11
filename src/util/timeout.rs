//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Wrap a future with a timeout, building the error from the elapsed wait.
pub async fn with_timeout<T, E>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    let started = Instant::now();
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(started.elapsed())),
    }
}
