//! Streaming bundle queries: a fresh snapshot after every storage write.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::model::Bundle;
use crate::resume_db::BundleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeedFilter {
    All,
    Downloading,
}

/// Yields the current result set immediately, then again after each change.
pub struct BundleFeed {
    store: Arc<dyn BundleStore>,
    changes: watch::Receiver<u64>,
    filter: FeedFilter,
    primed: bool,
}

impl BundleFeed {
    pub(crate) fn new(store: Arc<dyn BundleStore>, filter: FeedFilter) -> Self {
        let changes = store.subscribe();
        Self {
            store,
            changes,
            filter,
            primed: false,
        }
    }

    /// Next snapshot. Bursts of writes between calls collapse into one
    /// snapshot. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Result<Vec<Bundle>>> {
        if self.primed {
            self.changes.changed().await.ok()?;
        } else {
            self.primed = true;
        }
        self.changes.borrow_and_update();
        Some(self.query().await)
    }

    async fn query(&self) -> Result<Vec<Bundle>> {
        match self.filter {
            FeedFilter::All => self.store.all_bundles().await,
            FeedFilter::Downloading => self.store.downloading_bundles().await,
        }
    }
}
