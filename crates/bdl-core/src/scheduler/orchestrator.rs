//! Process-wide registry of bundle tasks over a bounded worker pool.

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use crate::config::BdlConfig;
use crate::error::OrchestratorError;
use crate::model::{Bundle, TaskStatus};
use crate::resolver::{Resolver, SourceResolver};
use crate::resume_db::BundleStore;
use crate::storage::{Filesystem, LocalFilesystem};
use crate::transport::Transport;

use super::feed::{BundleFeed, FeedFilter};
use super::notify::{BundleListener, Notifier, NotifierHandle};
use super::pool::{Submitted, WorkerPool};
use super::registry::Registry;
use super::task::{Task, TaskContext};

/// External capabilities the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BundleStore>,
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<dyn Resolver>,
    pub filesystem: Arc<dyn Filesystem>,
}

impl Collaborators {
    /// `SourceResolver` over `transport` and the local filesystem.
    pub fn new(store: Arc<dyn BundleStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            resolver: Arc::new(SourceResolver::new(Arc::clone(&transport))),
            store,
            transport,
            filesystem: Arc::new(LocalFilesystem),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_filesystem(mut self, filesystem: Arc<dyn Filesystem>) -> Self {
        self.filesystem = filesystem;
        self
    }
}

struct Engine {
    ctx: Arc<TaskContext>,
    filesystem: Arc<dyn Filesystem>,
    pool: WorkerPool,
    registry: Mutex<Registry>,
    notifier: Mutex<Option<NotifierHandle>>,
}

type Result<T> = std::result::Result<T, OrchestratorError>;

/// Entry point of the engine. Create one per process, `initialize` it, and
/// drive bundles by key.
#[derive(Default)]
pub struct Orchestrator {
    engine: RwLock<Option<Arc<Engine>>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark persisted active bundles paused, start `config.concurrency`
    /// workers and the listener notifier.
    pub async fn initialize(&self, config: &BdlConfig, collaborators: Collaborators) -> Result<()> {
        let mut slot = self.engine.write().await;
        if slot.is_some() {
            return Err(OrchestratorError::AlreadyInitialized);
        }
        let paused = collaborators
            .store
            .pause_all_bundles()
            .await
            .map_err(OrchestratorError::Storage)?;
        if paused > 0 {
            tracing::info!(paused, "bundles left active by a previous run marked paused");
        }

        let (notifier, notifier_handle) = Notifier::spawn();
        let ctx = Arc::new(TaskContext {
            store: collaborators.store,
            transport: collaborators.transport,
            resolver: collaborators.resolver,
            notifier,
            transfer: config.transfer.clone(),
        });
        *slot = Some(Arc::new(Engine {
            ctx,
            filesystem: collaborators.filesystem,
            pool: WorkerPool::start(config.concurrency),
            registry: Mutex::new(Registry::default()),
            notifier: Mutex::new(Some(notifier_handle)),
        }));
        tracing::info!(workers = config.concurrency.max(1), "orchestrator initialized");
        Ok(())
    }

    /// Pause every task, stop the pool and the notifier. `initialize` may be
    /// called again afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        let engine = self
            .engine
            .write()
            .await
            .take()
            .ok_or(OrchestratorError::NotInitialized)?;
        let tasks = engine.registry.lock().unwrap().tasks();
        for task in &tasks {
            if let Err(e) = task.pause().await {
                tracing::warn!(key = task.key(), "pause on shutdown: {:#}", e);
            }
        }
        engine.pool.shutdown().await;
        engine.registry.lock().unwrap().clear();
        let handle = engine.notifier.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        tracing::info!("orchestrator shut down");
        Ok(())
    }

    async fn engine(&self) -> Result<Arc<Engine>> {
        self.engine
            .read()
            .await
            .clone()
            .ok_or(OrchestratorError::NotInitialized)
    }

    /// Register (or reuse) the task for `bundle.key` and dispatch it.
    ///
    /// A key with a stored row but no live task picks up the stored status,
    /// counters and item checkpoints; `bundle` only supplies the source and
    /// directory while the stored row is unresolved.
    pub async fn submit(&self, bundle: Bundle) -> Result<()> {
        let engine = self.engine().await?;
        let existing = engine.task(&bundle.key);
        let task = match existing {
            Some(task) => {
                task.merge_source(&bundle.source, &bundle.dir);
                task
            }
            None => {
                let stored = engine
                    .ctx
                    .store
                    .bundle_by_key(&bundle.key)
                    .await
                    .map_err(OrchestratorError::Storage)?;
                let bundle = match stored {
                    Some(stored) => adopt_stored(stored, bundle),
                    None => bundle,
                };
                let mut registry = engine.registry.lock().unwrap();
                match registry.get(&bundle.key) {
                    Some(task) => {
                        task.merge_source(&bundle.source, &bundle.dir);
                        task
                    }
                    None => {
                        let task = Arc::new(Task::new(bundle, Arc::clone(&engine.ctx)));
                        registry.insert(Arc::clone(&task));
                        task
                    }
                }
            }
        };
        engine.dispatch(&task).await
    }

    /// Replace the listener of `key`'s task (`None` unbinds).
    pub async fn bind_listener(
        &self,
        key: &str,
        listener: Option<Arc<dyn BundleListener>>,
    ) -> Result<()> {
        let engine = self.engine().await?;
        match engine.task(key) {
            Some(task) => task.set_listener(listener),
            None => tracing::warn!(key, "bind_listener: no task registered"),
        }
        Ok(())
    }

    pub async fn pause(&self, key: &str) -> Result<()> {
        let engine = self.engine().await?;
        engine.pause(key).await
    }

    /// Stop `key`, forget it, delete its row and its directory.
    pub async fn cancel(&self, key: &str) -> Result<()> {
        let engine = self.engine().await?;
        let task = engine.registry.lock().unwrap().remove(key);
        engine.pool.remove(key);

        let dir = match task {
            Some(task) => {
                if let Err(e) = task.pause().await {
                    tracing::warn!(key, "pause before cancel: {:#}", e);
                }
                task.wait_idle().await;
                if let Err(e) = task.update_status(TaskStatus::Cancel).await {
                    tracing::warn!(key, "cancel status: {:#}", e);
                }
                task.snapshot().dir
            }
            None => {
                let stored = engine
                    .ctx
                    .store
                    .bundle_by_key(key)
                    .await
                    .map_err(OrchestratorError::Storage)?;
                match stored {
                    Some(bundle) => bundle.dir,
                    None => {
                        tracing::warn!(key, "cancel: unknown bundle");
                        return Ok(());
                    }
                }
            }
        };

        engine
            .ctx
            .store
            .delete_bundle_by_key(key)
            .await
            .map_err(OrchestratorError::Storage)?;
        engine
            .filesystem
            .remove_dir_all(&dir)
            .await
            .map_err(OrchestratorError::Storage)?;
        tracing::info!(key, dir = %dir.display(), "bundle cancelled");
        Ok(())
    }

    pub async fn pause_all(&self) -> Result<()> {
        let engine = self.engine().await?;
        let keys: Vec<String> = engine
            .registry
            .lock()
            .unwrap()
            .tasks()
            .iter()
            .map(|t| t.key().to_string())
            .collect();
        for key in keys {
            engine.pause(&key).await?;
        }
        Ok(())
    }

    /// Resume everything. With nothing registered, bundles are rehydrated
    /// from storage; otherwise every registered task is dispatched again.
    pub async fn start_all(&self) -> Result<()> {
        let engine = self.engine().await?;
        let tasks = {
            let registry = engine.registry.lock().unwrap();
            (!registry.is_empty()).then(|| registry.tasks())
        };
        match tasks {
            Some(tasks) => {
                for task in tasks {
                    engine.dispatch(&task).await?;
                }
            }
            None => {
                let bundles = engine
                    .ctx
                    .store
                    .resumable_bundles()
                    .await
                    .map_err(OrchestratorError::Storage)?;
                tracing::info!(count = bundles.len(), "rehydrating bundles");
                for bundle in bundles {
                    self.submit(bundle).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn all_bundles(&self) -> Result<Vec<Bundle>> {
        let engine = self.engine().await?;
        engine
            .ctx
            .store
            .all_bundles()
            .await
            .map_err(OrchestratorError::Storage)
    }

    pub async fn downloading_bundles(&self) -> Result<Vec<Bundle>> {
        let engine = self.engine().await?;
        engine
            .ctx
            .store
            .downloading_bundles()
            .await
            .map_err(OrchestratorError::Storage)
    }

    pub async fn watch_all_bundles(&self) -> Result<BundleFeed> {
        let engine = self.engine().await?;
        Ok(BundleFeed::new(Arc::clone(&engine.ctx.store), FeedFilter::All))
    }

    pub async fn watch_downloading_bundles(&self) -> Result<BundleFeed> {
        let engine = self.engine().await?;
        Ok(BundleFeed::new(
            Arc::clone(&engine.ctx.store),
            FeedFilter::Downloading,
        ))
    }

    /// Live snapshot (items included) of a registered bundle.
    pub async fn bundle(&self, key: &str) -> Result<Option<Bundle>> {
        let engine = self.engine().await?;
        Ok(engine.task(key).map(|t| t.snapshot()))
    }

    pub async fn is_registered(&self, key: &str) -> Result<bool> {
        let engine = self.engine().await?;
        Ok(engine.task(key).is_some())
    }

    pub async fn is_pending(&self, key: &str) -> Result<bool> {
        let engine = self.engine().await?;
        Ok(engine.pool.is_pending(key))
    }

    /// No task pending or running.
    pub async fn is_idle(&self) -> Result<bool> {
        let engine = self.engine().await?;
        Ok(engine.pool.is_idle())
    }
}

/// Stored row of a key being submitted again. The incoming source and
/// directory replace the stored ones only while nothing was resolved.
fn adopt_stored(mut stored: Bundle, incoming: Bundle) -> Bundle {
    if !stored.initialized {
        stored.source = incoming.source;
        stored.dir = incoming.dir;
    }
    tracing::debug!(
        key = %stored.key,
        status = %stored.status,
        items = stored.items.len(),
        "submit resumes stored bundle"
    );
    stored
}

impl Engine {
    fn task(&self, key: &str) -> Option<Arc<Task>> {
        self.registry.lock().unwrap().get(key)
    }

    async fn dispatch(&self, task: &Arc<Task>) -> Result<()> {
        let key = task.key();
        let status = task.status();
        if status == TaskStatus::Finished {
            tracing::debug!(key, "already finished");
            return Ok(());
        }
        if self.pool.is_pending(key) {
            tracing::debug!(key, "already pending");
            return Ok(());
        }
        if self.pool.is_running(key) && !status.is_stopped() {
            tracing::debug!(key, "already running");
            return Ok(());
        }

        task.start().await.map_err(OrchestratorError::Storage)?;
        match self.pool.submit(Arc::clone(task)) {
            Submitted::Queued { outstanding } => {
                tracing::debug!(key, outstanding, "submitted");
                if outstanding > self.pool.size() && self.pool.is_pending(key) {
                    if let Err(e) = task.queue().await {
                        tracing::warn!(key, "queue status: {:#}", e);
                    }
                }
            }
            Submitted::AlreadyPending => tracing::debug!(key, "already pending"),
            Submitted::Closed => tracing::warn!(key, "pool closed; bundle not submitted"),
        }
        Ok(())
    }

    async fn pause(&self, key: &str) -> Result<()> {
        let Some(task) = self.task(key) else {
            tracing::warn!(key, "pause: no task registered");
            return Ok(());
        };
        self.pool.remove(key);
        task.pause().await.map_err(OrchestratorError::Storage)
    }
}
