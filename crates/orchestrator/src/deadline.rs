//! Racing an operation against a deadline.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// The deadline elapsed before the operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {}ms", .deadline.as_millis())]
pub struct TimedOut {
    pub deadline: Duration,
}

/// Run `operation` until it completes or `deadline` elapses.
///
/// If the operation wins, `on_expire` is dropped without being called. If
/// the deadline wins, `on_expire` runs exactly once and the operation is
/// dropped, so anything it would have produced later is never observed.
/// When both become ready in the same poll the operation wins.
pub async fn race<F, E>(
    operation: F,
    deadline: Duration,
    on_expire: E,
) -> Result<F::Output, TimedOut>
where
    F: Future,
    E: FnOnce(),
{
    tokio::pin!(operation);

    tokio::select! {
        biased;

        output = &mut operation => Ok(output),
        _ = tokio::time::sleep(deadline) => {
            on_expire();
            Err(TimedOut { deadline })
        }
    }
}

/// One-shot expiry signal shared between a phase and whoever watches it.
///
/// Firing is monotonic: once fired the guard stays fired, and only the
/// first [`fire`](Self::fire) reports `true`.
#[derive(Debug, Clone, Default)]
pub struct ExpiryGuard {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl ExpiryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether this call was the one that fired the guard.
    pub fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::SeqCst);
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Completes once the guard fires.
    pub async fn expired(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
