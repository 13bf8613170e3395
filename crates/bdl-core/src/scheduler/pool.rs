//! Fixed-size worker pool over a FIFO backlog of tasks.
//!
//! Keeps up to `size` bundle runs in flight. A worker never picks a task
//! whose key is already running on another worker; it stays in the backlog
//! until that run exits.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::task::Task;

/// Outcome of [`WorkerPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Submitted {
    /// Enqueued; `outstanding` counts pending plus running tasks afterwards.
    Queued { outstanding: usize },
    AlreadyPending,
    Closed,
}

#[derive(Default)]
struct PoolState {
    pending: VecDeque<Arc<Task>>,
    running: HashSet<String>,
    closed: bool,
}

impl PoolState {
    fn take_runnable(&mut self) -> Option<Arc<Task>> {
        let index = self
            .pending
            .iter()
            .position(|t| !self.running.contains(t.key()))?;
        let task = self.pending.remove(index)?;
        self.running.insert(task.key().to_string());
        Some(task)
    }

    fn is_pending(&self, key: &str) -> bool {
        self.pending.iter().any(|t| t.key() == key)
    }
}

struct PoolShared {
    state: Mutex<PoolState>,
    wake: Notify,
}

pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    size: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub(crate) fn start(size: usize) -> Self {
        let size = size.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            wake: Notify::new(),
        });
        let workers = (0..size)
            .map(|id| tokio::spawn(worker_loop(Arc::clone(&shared), id)))
            .collect();
        Self {
            shared,
            size,
            workers: Mutex::new(workers),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Enqueue unless a task with the same key is already pending.
    pub(crate) fn submit(&self, task: Arc<Task>) -> Submitted {
        let outcome = {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                Submitted::Closed
            } else if state.is_pending(task.key()) {
                Submitted::AlreadyPending
            } else {
                state.pending.push_back(task);
                Submitted::Queued {
                    outstanding: state.pending.len() + state.running.len(),
                }
            }
        };
        if matches!(outcome, Submitted::Queued { .. }) {
            self.shared.wake.notify_waiters();
        }
        outcome
    }

    /// Drop `key` from the backlog. Returns true if it was pending.
    pub(crate) fn remove(&self, key: &str) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let before = state.pending.len();
        state.pending.retain(|t| t.key() != key);
        state.pending.len() != before
    }

    pub(crate) fn is_pending(&self, key: &str) -> bool {
        self.shared.state.lock().unwrap().is_pending(key)
    }

    pub(crate) fn is_running(&self, key: &str) -> bool {
        self.shared.state.lock().unwrap().running.contains(key)
    }

    /// Nothing pending and nothing running.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.pending.is_empty() && state.running.is_empty()
    }

    /// Drop the backlog, let running tasks finish, and wait for every worker to exit.
    pub(crate) async fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
            state.pending.clear();
        }
        self.shared.wake.notify_waiters();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("pool worker: {}", e);
            }
        }
    }
}

async fn worker_loop(shared: Arc<PoolShared>, id: usize) {
    loop {
        let task = loop {
            let notified = shared.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = shared.state.lock().unwrap();
                if state.closed {
                    tracing::debug!(worker = id, "worker exiting");
                    return;
                }
                if let Some(task) = state.take_runnable() {
                    break task;
                }
            }
            notified.await;
        };

        let key = task.key().to_string();
        tracing::debug!(worker = id, key = %key, "run start");
        // Run in its own task so a panic is contained and reported here.
        let run = tokio::spawn({
            let task = Arc::clone(&task);
            async move { task.run().await }
        });
        if let Err(e) = run.await {
            tracing::error!(worker = id, key = %key, "bundle run aborted: {}", e);
        }
        tracing::debug!(worker = id, key = %key, "run end");

        shared.state.lock().unwrap().running.remove(&key);
        // A backlog entry with the same key may be runnable now.
        shared.wake.notify_waiters();
    }
}
