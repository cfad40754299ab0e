//! Cancellable waits.
//!
//! The retry engine only ever blocks in two places: waiting for a send token
//! and sleeping out a backoff delay. Both go through [`sleep_or_cancel`], which
//! returns a tagged [`Canceled`] instead of unwinding, so every layer can tell
//! "the caller gave up" apart from "the service said no".

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The wait was interrupted by the caller's cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait canceled")]
pub struct Canceled;

/// Sleeps for `duration` unless `token` is canceled first.
///
/// An already-canceled token wins even when `duration` is zero.
///
/// ```
/// use std::time::Duration;
/// use tower_adaptive_retry_core::{sleep_or_cancel, CancellationToken};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let token = CancellationToken::new();
/// token.cancel();
/// assert!(sleep_or_cancel(Duration::from_secs(60), &token).await.is_err());
/// # }
/// ```
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> Result<(), Canceled> {
    if token.is_cancelled() {
        return Err(Canceled);
    }
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            #[cfg(feature = "tracing")]
            tracing::debug!(wait_ms = duration.as_millis() as u64, "wait canceled");
            Err(Canceled)
        }
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
