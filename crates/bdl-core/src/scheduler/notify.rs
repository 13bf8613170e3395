//! Listener delivery.
//!
//! Status transitions are queued on an unbounded channel and delivered by one
//! notifier task, so callbacks never run concurrently and each bundle's
//! transitions arrive in the order they happened.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::model::{Bundle, ErrorKind, TaskStatus};

/// Receives status transitions of one bundle. Every callback defaults to a no-op.
///
/// `on_connecting` fires for both INIT (items resolved) and CONNECTING
/// (transfer progress, once per finished item). START is not delivered.
pub trait BundleListener: Send + Sync {
    fn on_connecting(&self, _bundle: &Bundle) {}
    fn on_queue(&self, _bundle: &Bundle) {}
    fn on_pause(&self, _bundle: &Bundle) {}
    fn on_cancel(&self, _bundle: &Bundle) {}
    fn on_error(&self, _bundle: &Bundle, _kind: ErrorKind) {}
    fn on_finish(&self, _bundle: &Bundle) {}
}

struct Signal {
    listener: Arc<dyn BundleListener>,
    bundle: Bundle,
}

/// Sending half; cloned into every task.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<Signal>,
}

/// Owns the delivery task.
pub(crate) struct NotifierHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl Notifier {
    pub(crate) fn spawn() -> (Notifier, NotifierHandle) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Signal>();
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    signal = rx.recv() => match signal {
                        Some(signal) => deliver(signal),
                        None => break,
                    },
                    _ = &mut shutdown_rx => {
                        while let Ok(signal) = rx.try_recv() {
                            deliver(signal);
                        }
                        break;
                    }
                }
            }
            tracing::debug!("notifier stopped");
        });
        (Notifier { tx }, NotifierHandle { shutdown, join })
    }

    /// Queue `bundle` (whose `status` is the transition) for `listener`.
    pub(crate) fn send(&self, listener: Option<Arc<dyn BundleListener>>, bundle: Bundle) {
        let Some(listener) = listener else {
            tracing::debug!(key = %bundle.key, status = %bundle.status, "no listener bound");
            return;
        };
        if self.tx.send(Signal { listener, bundle }).is_err() {
            tracing::debug!("notifier closed; signal dropped");
        }
    }
}

impl NotifierHandle {
    /// Deliver what is already queued, then stop.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.join.await {
            tracing::warn!("notifier task: {}", e);
        }
    }
}

fn deliver(signal: Signal) {
    let Signal { listener, bundle } = signal;
    let delivered = catch_unwind(AssertUnwindSafe(|| match bundle.status {
        TaskStatus::Init | TaskStatus::Connecting => listener.on_connecting(&bundle),
        TaskStatus::Queue => listener.on_queue(&bundle),
        TaskStatus::Pause => listener.on_pause(&bundle),
        TaskStatus::Cancel => listener.on_cancel(&bundle),
        TaskStatus::ErrorNet | TaskStatus::ErrorStorage => {
            if let Some(kind) = bundle.status.error_kind() {
                listener.on_error(&bundle, kind);
            }
        }
        TaskStatus::Finished => listener.on_finish(&bundle),
        TaskStatus::Start => {}
    }));
    if delivered.is_err() {
        tracing::warn!(key = %bundle.key, status = %bundle.status, "listener panicked");
    }
}
