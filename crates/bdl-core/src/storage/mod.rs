//! Disk I/O for item files and bundle directories.
//!
//! Item files are written in place (no temp file): the file on disk plus the
//! item's checkpointed `completed_size` is the resume state.

mod item_file;

pub use item_file::{resume_offset, ItemFile};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// Directory removal used when a bundle is cancelled.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Recursively delete `path`. A missing directory is not an error.
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;
}

/// `tokio::fs` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

#[async_trait]
impl Filesystem for LocalFilesystem {
    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}
