//! Sequential writer for one item's local file.

use anyhow::{Context, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Where to continue writing an item: the checkpointed size, clamped to what
/// is actually on disk. An empty file always restarts at 0.
pub fn resume_offset(completed_size: u64, file_len: u64) -> u64 {
    if file_len == 0 {
        0
    } else {
        completed_size.min(file_len)
    }
}

/// Open item file with a write cursor.
pub struct ItemFile {
    file: File,
    path: PathBuf,
}

impl ItemFile {
    /// Create the parent directory if needed and open `path` read+write
    /// without truncation.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub async fn len(&self) -> Result<u64> {
        let meta = self
            .file
            .metadata()
            .await
            .with_context(|| format!("failed to stat {}", self.path.display()))?;
        Ok(meta.len())
    }

    /// Move the write cursor to `offset`.
    pub async fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .with_context(|| format!("failed to seek {} to {}", self.path.display(), offset))?;
        Ok(())
    }

    /// Drop everything written so far and rewind to 0.
    pub async fn restart(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .await
            .with_context(|| format!("failed to truncate {}", self.path.display()))?;
        self.seek_to(0).await
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    /// Flush and fsync file data.
    pub async fn sync(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        self.file
            .sync_data()
            .await
            .with_context(|| format!("failed to sync {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
