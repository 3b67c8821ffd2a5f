//! Bounded polling
//!
//! Used by the workflows to wait for array-side state transitions such as a
//! clone copy finishing.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Poll `predicate` every `interval` until it reports `true`.
///
/// A predicate error is returned immediately without retry. The deadline is
/// measured from the call, and is only checked between polls: a predicate
/// call that hangs is not interrupted and delays the timeout past `timeout`.
pub async fn wait_until<F, Fut>(mut predicate: F, timeout: Duration, interval: Duration) -> Result<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    let started = Instant::now();

    let poller = tokio::spawn(async move {
        let mut polls: u64 = 0;
        loop {
            polls += 1;
            if predicate().await? {
                debug!("Wait condition met after {} polls", polls);
                return Ok(());
            }

            tokio::time::sleep(interval).await;

            if started.elapsed() >= timeout {
                return Err(Error::WaitTimeout(timeout));
            }
        }
    });

    poller
        .await
        .map_err(|e| Error::Internal(format!("Wait task failed: {}", e)))?
}
