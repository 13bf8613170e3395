//! Bundle row operations.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use super::db::{unix_timestamp, ResumeDb};
use crate::model::{Bundle, BundleId, SourceDescriptor, TaskStatus};

const BUNDLE_COLUMNS: &str = "id, key, playlist_url, page_url, dir, status, initialized, total_count, completed_count";

fn bundle_from_row(row: &SqliteRow) -> Bundle {
    let status: String = row.get("status");
    let dir: String = row.get("dir");
    let initialized: i64 = row.get("initialized");
    let total_count: i64 = row.get("total_count");
    let completed_count: i64 = row.get("completed_count");
    Bundle {
        key: row.get("key"),
        id: Some(row.get("id")),
        source: SourceDescriptor {
            playlist: row.get("playlist_url"),
            page: row.get("page_url"),
        },
        dir: PathBuf::from(dir),
        status: TaskStatus::parse_lossy(&status),
        initialized: initialized != 0,
        total_count: total_count as u32,
        completed_count: completed_count as u32,
        items: Vec::new(),
    }
}

impl ResumeDb {
    /// Upsert by `key`. The row's id survives re-submission of the same key.
    pub async fn insert_bundle(&self, bundle: &Bundle) -> Result<BundleId> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO bundles (
                key, playlist_url, page_url, dir, status,
                initialized, total_count, completed_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(key) DO UPDATE SET
                playlist_url = excluded.playlist_url,
                page_url = excluded.page_url,
                dir = excluded.dir,
                status = excluded.status,
                initialized = excluded.initialized,
                total_count = excluded.total_count,
                completed_count = excluded.completed_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&bundle.key)
        .bind(bundle.source.playlist.as_deref())
        .bind(bundle.source.page.as_deref())
        .bind(bundle.dir.to_string_lossy().into_owned())
        .bind(bundle.status.as_str())
        .bind(bundle.initialized as i64)
        .bind(i64::from(bundle.total_count))
        .bind(i64::from(bundle.completed_count))
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query("SELECT id FROM bundles WHERE key = ?1")
            .bind(&bundle.key)
            .fetch_one(&self.pool)
            .await
            .context("bundle row missing after upsert")?
            .get("id");
        self.notify_changed();
        Ok(id)
    }

    pub async fn update_bundle(&self, bundle: &Bundle) -> Result<()> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE bundles
            SET playlist_url = ?1,
                page_url = ?2,
                dir = ?3,
                status = ?4,
                initialized = ?5,
                total_count = ?6,
                completed_count = ?7,
                updated_at = ?8
            WHERE key = ?9
            "#,
        )
        .bind(bundle.source.playlist.as_deref())
        .bind(bundle.source.page.as_deref())
        .bind(bundle.dir.to_string_lossy().into_owned())
        .bind(bundle.status.as_str())
        .bind(bundle.initialized as i64)
        .bind(i64::from(bundle.total_count))
        .bind(i64::from(bundle.completed_count))
        .bind(now)
        .bind(&bundle.key)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            tracing::debug!(key = %bundle.key, "update_bundle: no row for key");
        }
        self.notify_changed();
        Ok(())
    }

    pub async fn bundle_by_key(&self, key: &str) -> Result<Option<Bundle>> {
        let row = sqlx::query(&format!("SELECT {} FROM bundles WHERE key = ?1", BUNDLE_COLUMNS))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut bundle = bundle_from_row(&row);
        if let Some(id) = bundle.id {
            bundle.items = self.items_by_bundle_id(id).await?;
        }
        Ok(Some(bundle))
    }

    /// Remove the bundle row and all its items in one transaction.
    pub async fn delete_bundle_by_key(&self, key: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT id FROM bundles WHERE key = ?1")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(false);
        };
        let id: i64 = row.get("id");
        sqlx::query("DELETE FROM items WHERE bundle_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM bundles WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.notify_changed();
        Ok(true)
    }

    pub async fn resumable_bundles(&self) -> Result<Vec<Bundle>> {
        self.list_where("status NOT IN ('finished', 'cancel')").await
    }

    /// Startup recovery: rows left active by a previous process become paused.
    pub async fn pause_all_bundles(&self) -> Result<u64> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE bundles
            SET status = 'pause',
                updated_at = ?1
            WHERE status NOT IN ('finished', 'pause', 'cancel')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            self.notify_changed();
        }
        Ok(result.rows_affected())
    }

    pub async fn all_bundles(&self) -> Result<Vec<Bundle>> {
        self.list_where("1 = 1").await
    }

    pub async fn downloading_bundles(&self) -> Result<Vec<Bundle>> {
        self.list_where("status IN ('start', 'init', 'queue', 'connecting')")
            .await
    }

    async fn list_where(&self, predicate: &str) -> Result<Vec<Bundle>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bundles WHERE {} ORDER BY id ASC",
            BUNDLE_COLUMNS, predicate
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(bundle_from_row).collect())
    }
}
