//! One scheduling unit per bundle: status machine, resolution, and the
//! per-item transfer loop.
//!
//! A run is interrupted cooperatively. `pause` bumps the task's epoch and
//! aborts the in-flight request; the run compares the epoch it started with
//! (and the current status) at every item boundary and before every chunk.

mod transfer;


use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::config::TransferConfig;
use crate::control::AbortSignal;
use crate::error::{NetworkError, TaskError};
use crate::model::{Bundle, Item, SourceDescriptor, TaskStatus};
use crate::resolver::Resolver;
use crate::resume_db::BundleStore;
use crate::transport::Transport;

use super::notify::{BundleListener, Notifier};

/// Collaborators shared by every task of one orchestrator.
pub(crate) struct TaskContext {
    pub store: Arc<dyn BundleStore>,
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<dyn Resolver>,
    pub notifier: Notifier,
    pub transfer: TransferConfig,
}

pub(crate) struct Task {
    key: String,
    bundle: Mutex<Bundle>,
    listener: Mutex<Option<Arc<dyn BundleListener>>>,
    epoch: AtomicU64,
    inflight: Mutex<Option<AbortSignal>>,
    /// Serializes set-status, persist and notify.
    status_gate: tokio::sync::Mutex<()>,
    /// Held for the duration of a run.
    run_guard: tokio::sync::Mutex<()>,
    ctx: Arc<TaskContext>,
}

impl Task {
    pub(crate) fn new(bundle: Bundle, ctx: Arc<TaskContext>) -> Self {
        Self {
            key: bundle.key.clone(),
            bundle: Mutex::new(bundle),
            listener: Mutex::new(None),
            epoch: AtomicU64::new(0),
            inflight: Mutex::new(None),
            status_gate: tokio::sync::Mutex::new(()),
            run_guard: tokio::sync::Mutex::new(()),
            ctx,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.bundle.lock().unwrap().status
    }

    /// Full copy of the bundle, items included.
    pub(crate) fn snapshot(&self) -> Bundle {
        self.bundle.lock().unwrap().clone()
    }

    fn summary(&self) -> Bundle {
        self.bundle.lock().unwrap().summary()
    }

    pub(crate) fn set_listener(&self, listener: Option<Arc<dyn BundleListener>>) {
        *self.listener.lock().unwrap() = listener;
    }

    fn listener(&self) -> Option<Arc<dyn BundleListener>> {
        self.listener.lock().unwrap().clone()
    }

    /// Take a new source and directory, but only before resolution ran.
    pub(crate) fn merge_source(&self, source: &SourceDescriptor, dir: &Path) -> bool {
        let mut bundle = self.bundle.lock().unwrap();
        if bundle.initialized {
            return false;
        }
        bundle.source = source.clone();
        bundle.dir = dir.to_path_buf();
        true
    }

    fn is_interrupted(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) != epoch || self.status().is_stopped()
    }

    /// Bump the epoch and abort the in-flight request, if any.
    fn interrupt(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(signal) = self.inflight.lock().unwrap().as_ref() {
            signal.abort();
        }
    }

    /// Set `status`, persist the row, and queue the transition for the listener.
    pub(crate) async fn update_status(&self, status: TaskStatus) -> anyhow::Result<()> {
        let _gate = self.status_gate.lock().await;
        self.publish(status).await
    }

    async fn publish(&self, status: TaskStatus) -> anyhow::Result<()> {
        let snapshot = {
            let mut bundle = self.bundle.lock().unwrap();
            bundle.status = status;
            bundle.summary()
        };
        let persisted = self.ctx.store.update_bundle(&snapshot).await;
        if let Err(e) = &persisted {
            tracing::warn!(key = %self.key, %status, "status persist failed: {:#}", e);
        }
        self.ctx.notifier.send(self.listener(), snapshot);
        persisted
    }

    /// Transition from inside a run; skipped once the run has been interrupted.
    async fn advance(&self, epoch: u64, status: TaskStatus) -> Result<bool, TaskError> {
        let _gate = self.status_gate.lock().await;
        if self.is_interrupted(epoch) {
            return Ok(false);
        }
        self.publish(status).await.map_err(TaskError::Storage)?;
        Ok(true)
    }

    /// Upsert the bundle row and enter START.
    pub(crate) async fn start(&self) -> anyhow::Result<()> {
        let _gate = self.status_gate.lock().await;
        let snapshot = {
            let mut bundle = self.bundle.lock().unwrap();
            bundle.status = TaskStatus::Start;
            bundle.summary()
        };
        let id = self.ctx.store.insert_bundle(&snapshot).await?;
        let snapshot = {
            let mut bundle = self.bundle.lock().unwrap();
            bundle.id = Some(id);
            bundle.summary()
        };
        self.ctx.notifier.send(self.listener(), snapshot);
        Ok(())
    }

    /// Informational QUEUE; only replaces START.
    pub(crate) async fn queue(&self) -> anyhow::Result<()> {
        let _gate = self.status_gate.lock().await;
        if self.status() != TaskStatus::Start {
            return Ok(());
        }
        self.publish(TaskStatus::Queue).await
    }

    /// Stop the current run (if any) and enter PAUSE. A finished bundle stays finished.
    pub(crate) async fn pause(&self) -> anyhow::Result<()> {
        self.interrupt();
        let _gate = self.status_gate.lock().await;
        if self.status() == TaskStatus::Finished {
            return Ok(());
        }
        self.publish(TaskStatus::Pause).await
    }

    /// Resolves once no run is in progress.
    pub(crate) async fn wait_idle(&self) {
        let _ = self.run_guard.lock().await;
    }

    /// One dispatch of the bundle. Errors end as ERROR_NET / ERROR_STORAGE.
    pub(crate) async fn run(&self) {
        let _running = self.run_guard.lock().await;
        let epoch = self.epoch.load(Ordering::Acquire);
        if self.is_interrupted(epoch) {
            tracing::debug!(key = %self.key, "run skipped: interrupted before start");
            return;
        }
        if let Err(e) = self.run_items(epoch).await {
            self.fail(epoch, e).await;
        }
    }

    async fn fail(&self, epoch: u64, err: TaskError) {
        if self.is_interrupted(epoch) {
            tracing::debug!(key = %self.key, "error after interruption ignored: {}", err);
            return;
        }
        tracing::warn!(key = %self.key, "bundle failed: {}", err);
        let status = err.kind().status();
        if let Err(e) = self.advance(epoch, status).await {
            tracing::warn!(key = %self.key, "could not record {}: {}", status, e);
        }
    }

    async fn run_items(&self, epoch: u64) -> Result<(), TaskError> {
        let (initialized, empty) = {
            let bundle = self.bundle.lock().unwrap();
            (bundle.initialized, bundle.items.is_empty())
        };
        if !initialized {
            self.resolve(epoch).await?;
        } else if empty {
            self.reload_items().await?;
        }
        if self.is_interrupted(epoch) {
            return Ok(());
        }

        let count = {
            let mut bundle = self.bundle.lock().unwrap();
            if bundle.items.is_empty() {
                return Err(NetworkError::EmptyBundle.into());
            }
            bundle.total_count = bundle.items.len() as u32;
            bundle.initialized = true;
            bundle.completed_count = bundle.finished_items();
            bundle.items.len()
        };
        self.advance(epoch, TaskStatus::Init).await?;

        for index in 0..count {
            if self.is_interrupted(epoch) {
                return Ok(());
            }
            let mut item = self.bundle.lock().unwrap().items[index].clone();
            if item.finished {
                continue;
            }
            let result = self.download_file(epoch, &mut item).await;
            let finished = item.finished;
            let done = {
                let mut bundle = self.bundle.lock().unwrap();
                bundle.items[index] = item;
                if finished {
                    bundle.completed_count += 1;
                }
                bundle.completed_count == bundle.total_count
            };
            result?;
            if self.is_interrupted(epoch) {
                return Ok(());
            }
            if finished {
                self.advance(epoch, TaskStatus::Connecting).await?;
                if done {
                    self.advance(epoch, TaskStatus::Finished).await?;
                    tracing::info!(key = %self.key, "bundle finished");
                    return Ok(());
                }
            }
        }

        let all_done = {
            let bundle = self.bundle.lock().unwrap();
            bundle.completed_count == bundle.total_count
        };
        if all_done && self.advance(epoch, TaskStatus::Finished).await? {
            tracing::info!(key = %self.key, "bundle finished");
        }
        Ok(())
    }

    /// Resolve the source descriptor and persist the resulting items.
    async fn resolve(&self, epoch: u64) -> Result<(), TaskError> {
        let (source, dir, bundle_id) = {
            let bundle = self.bundle.lock().unwrap();
            (bundle.source.clone(), bundle.dir.clone(), bundle.id)
        };
        let signal = AbortSignal::new();
        *self.inflight.lock().unwrap() = Some(signal.clone());
        if self.is_interrupted(epoch) {
            signal.abort();
        }
        let resolved = self.ctx.resolver.resolve(&source, &dir, &signal).await;
        *self.inflight.lock().unwrap() = None;
        let resolved = resolved.map_err(NetworkError::Resolve)?;
        if self.is_interrupted(epoch) {
            return Ok(());
        }
        let bundle_id = bundle_id
            .ok_or_else(|| TaskError::Storage(anyhow!("bundle {} has no row id", self.key)))?;

        let mut items: Vec<Item> = resolved
            .into_iter()
            .enumerate()
            .map(|(seq, r)| Item::new(seq as u32, r.url, r.file_path, r.file_name))
            .collect();
        let ids = self
            .ctx
            .store
            .insert_items(bundle_id, &items)
            .await
            .map_err(TaskError::Storage)?;
        for (item, id) in items.iter_mut().zip(ids) {
            item.id = Some(id);
            item.bundle_id = Some(bundle_id);
        }
        tracing::info!(key = %self.key, items = items.len(), "resolved");
        self.bundle.lock().unwrap().items = items;
        Ok(())
    }

    /// Initialized bundle rehydrated without items: load them from storage.
    async fn reload_items(&self) -> Result<(), TaskError> {
        let Some(bundle_id) = self.bundle.lock().unwrap().id else {
            return Ok(());
        };
        let store = &self.ctx.store;
        if !store
            .items_exist_for_bundle(bundle_id)
            .await
            .map_err(TaskError::Storage)?
        {
            return Ok(());
        }
        let items = store
            .items_by_bundle_id(bundle_id)
            .await
            .map_err(TaskError::Storage)?;
        tracing::debug!(key = %self.key, items = items.len(), "items reloaded");
        self.bundle.lock().unwrap().items = items;
        Ok(())
    }
}
