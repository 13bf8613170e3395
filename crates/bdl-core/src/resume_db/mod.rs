//! Persistent bundle/item database (SQLite via sqlx).
//!
//! Stores one row per bundle (status, counters, source descriptor, directory)
//! and one row per resolved item with its checkpointed progress. This is the
//! source of truth for resume after a restart.

mod bundles;
mod db;
mod items;


pub use db::ResumeDb;
#[cfg(test)]
pub(crate) use db::open_memory;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::model::{Bundle, BundleId, Item, ItemId};

/// Durable store for bundle and item rows.
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Insert or update the row for `bundle.key`; returns its id.
    async fn insert_bundle(&self, bundle: &Bundle) -> Result<BundleId>;

    /// Update status, counters and descriptor of the row for `bundle.key`.
    async fn update_bundle(&self, bundle: &Bundle) -> Result<()>;

    /// Replace the item rows of `bundle_id`; returns the new ids in input order.
    async fn insert_items(&self, bundle_id: BundleId, items: &[Item]) -> Result<Vec<ItemId>>;

    /// Persist size, progress and finished flag of one item.
    async fn update_item(&self, item: &Item) -> Result<()>;

    /// Bundle row with its items.
    async fn bundle_by_key(&self, key: &str) -> Result<Option<Bundle>>;

    /// Delete the bundle row and its items. Returns false if no row existed.
    async fn delete_bundle_by_key(&self, key: &str) -> Result<bool>;

    async fn items_exist_for_bundle(&self, bundle_id: BundleId) -> Result<bool>;

    /// Items of a bundle in `seq` order.
    async fn items_by_bundle_id(&self, bundle_id: BundleId) -> Result<Vec<Item>>;

    /// Bundles that are neither finished nor cancelled, oldest first.
    async fn resumable_bundles(&self) -> Result<Vec<Bundle>>;

    /// Mark every non-finished bundle paused. Returns the number of rows changed.
    async fn pause_all_bundles(&self) -> Result<u64>;

    /// Every bundle, oldest first (items not loaded).
    async fn all_bundles(&self) -> Result<Vec<Bundle>>;

    /// Bundles in an active status (start, init, queue, connecting).
    async fn downloading_bundles(&self) -> Result<Vec<Bundle>>;

    /// Change counter bumped after every write.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

#[async_trait]
impl BundleStore for ResumeDb {
    async fn insert_bundle(&self, bundle: &Bundle) -> Result<BundleId> {
        ResumeDb::insert_bundle(self, bundle).await
    }

    async fn update_bundle(&self, bundle: &Bundle) -> Result<()> {
        ResumeDb::update_bundle(self, bundle).await
    }

    async fn insert_items(&self, bundle_id: BundleId, items: &[Item]) -> Result<Vec<ItemId>> {
        ResumeDb::insert_items(self, bundle_id, items).await
    }

    async fn update_item(&self, item: &Item) -> Result<()> {
        ResumeDb::update_item(self, item).await
    }

    async fn bundle_by_key(&self, key: &str) -> Result<Option<Bundle>> {
        ResumeDb::bundle_by_key(self, key).await
    }

    async fn delete_bundle_by_key(&self, key: &str) -> Result<bool> {
        ResumeDb::delete_bundle_by_key(self, key).await
    }

    async fn items_exist_for_bundle(&self, bundle_id: BundleId) -> Result<bool> {
        ResumeDb::items_exist_for_bundle(self, bundle_id).await
    }

    async fn items_by_bundle_id(&self, bundle_id: BundleId) -> Result<Vec<Item>> {
        ResumeDb::items_by_bundle_id(self, bundle_id).await
    }

    async fn resumable_bundles(&self) -> Result<Vec<Bundle>> {
        ResumeDb::resumable_bundles(self).await
    }

    async fn pause_all_bundles(&self) -> Result<u64> {
        ResumeDb::pause_all_bundles(self).await
    }

    async fn all_bundles(&self) -> Result<Vec<Bundle>> {
        ResumeDb::all_bundles(self).await
    }

    async fn downloading_bundles(&self) -> Result<Vec<Bundle>> {
        ResumeDb::downloading_bundles(self).await
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.change_receiver()
    }
}
