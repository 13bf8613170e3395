//! Abort signalling for in-flight transfers and the control socket location.
//!
//! Every ranged GET a task issues carries an [`AbortSignal`]. Pausing the task
//! trips the signal: the transport stops its transfer at the next callback and
//! a task waiting on a body read wakes immediately instead of waiting for the
//! next chunk to arrive.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct SignalInner {
    aborted: AtomicBool,
    notify: Notify,
}

/// Shared, cloneable abort flag with async wake-up.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<SignalInner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal. Idempotent.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Resolves once `abort` has been called (immediately if it already was).
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    Ok(crate::logging::state_dir()?.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn aborted_resolves_after_abort_from_another_task() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.abort();
        });
        tokio::time::timeout(Duration::from_secs(2), signal.aborted())
            .await
            .expect("signal should fire");
        assert!(signal.is_aborted());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn aborted_returns_immediately_when_already_tripped() {
        let signal = AbortSignal::new();
        signal.abort();
        signal.abort();
        tokio::time::timeout(Duration::from_millis(100), signal.aborted())
            .await
            .expect("already aborted");
    }
}
