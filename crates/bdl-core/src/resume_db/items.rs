//! Item row operations.

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use super::db::ResumeDb;
use crate::model::{BundleId, Item, ItemId};

fn item_from_row(row: &SqliteRow) -> Item {
    let seq: i64 = row.get("seq");
    let file_path: String = row.get("file_path");
    let total_size: Option<i64> = row.get("total_size");
    let completed_size: i64 = row.get("completed_size");
    let finished: i64 = row.get("finished");
    Item {
        id: Some(row.get("id")),
        bundle_id: Some(row.get("bundle_id")),
        seq: seq as u32,
        url: row.get("url"),
        file_path: PathBuf::from(file_path),
        file_name: row.get("file_name"),
        total_size: total_size.map(|n| n as u64),
        completed_size: completed_size as u64,
        finished: finished != 0,
    }
}

impl ResumeDb {
    /// Replace every item of `bundle_id` with `items`; ids come back in input order.
    pub async fn insert_items(&self, bundle_id: BundleId, items: &[Item]) -> Result<Vec<ItemId>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM items WHERE bundle_id = ?1")
            .bind(bundle_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = sqlx::query(
                r#"
                INSERT INTO items (
                    bundle_id, seq, url, file_path, file_name,
                    total_size, completed_size, finished
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(bundle_id)
            .bind(i64::from(item.seq))
            .bind(&item.url)
            .bind(item.file_path.to_string_lossy().into_owned())
            .bind(&item.file_name)
            .bind(item.total_size.map(|n| n as i64))
            .bind(item.completed_size as i64)
            .bind(item.finished as i64)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            ids.push(id);
        }
        tx.commit().await?;
        self.notify_changed();
        Ok(ids)
    }

    /// Checkpoint: size, progress and finished flag.
    pub async fn update_item(&self, item: &Item) -> Result<()> {
        let Some(id) = item.id else {
            bail!("item {} has no id; insert it first", item.url);
        };
        sqlx::query(
            r#"
            UPDATE items
            SET total_size = ?1,
                completed_size = ?2,
                finished = ?3
            WHERE id = ?4
            "#,
        )
        .bind(item.total_size.map(|n| n as i64))
        .bind(item.completed_size as i64)
        .bind(item.finished as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.notify_changed();
        Ok(())
    }

    pub async fn items_exist_for_bundle(&self, bundle_id: BundleId) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM items WHERE bundle_id = ?1")
            .bind(bundle_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    pub async fn items_by_bundle_id(&self, bundle_id: BundleId) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, bundle_id, seq, url, file_path, file_name,
                   total_size, completed_size, finished
            FROM items
            WHERE bundle_id = ?1
            ORDER BY seq ASC, id ASC
            "#,
        )
        .bind(bundle_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(item_from_row).collect())
    }
}
