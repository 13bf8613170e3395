//! Bundle and item records shared by the scheduler, the resolver and the database.

mod status;

pub use status::{ErrorKind, TaskStatus};

use std::path::{Path, PathBuf};

/// Storage-assigned bundle identifier.
pub type BundleId = i64;

/// Storage-assigned item identifier.
pub type ItemId = i64;

/// Where a bundle's item list comes from. Both fields may be set; playlist
/// items come first, page assets after them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// HLS/M3U8 playlist URL.
    pub playlist: Option<String>,
    /// HTML page URL whose assets are downloaded.
    pub page: Option<String>,
}

impl SourceDescriptor {
    pub fn playlist(url: impl Into<String>) -> Self {
        Self {
            playlist: Some(url.into()),
            page: None,
        }
    }

    pub fn page(url: impl Into<String>) -> Self {
        Self {
            playlist: None,
            page: Some(url.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.playlist.as_deref().map_or(true, str::is_empty)
            && self.page.as_deref().map_or(true, str::is_empty)
    }
}

/// One downloadable file of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: Option<ItemId>,
    pub bundle_id: Option<BundleId>,
    /// Position in resolved order.
    pub seq: u32,
    pub url: String,
    /// Directory the file lives in.
    pub file_path: PathBuf,
    pub file_name: String,
    /// Unknown until the first successful response.
    pub total_size: Option<u64>,
    /// Bytes written as of the last checkpoint.
    pub completed_size: u64,
    pub finished: bool,
}

impl Item {
    pub fn new(
        seq: u32,
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            bundle_id: None,
            seq,
            url: url.into(),
            file_path: file_path.into(),
            file_name: file_name.into(),
            total_size: None,
            completed_size: 0,
            finished: false,
        }
    }

    /// Full path of the local file.
    pub fn local_path(&self) -> PathBuf {
        self.file_path.join(&self.file_name)
    }

    /// True when the size is known, non-zero and fully written.
    pub fn is_complete(&self) -> bool {
        matches!(self.total_size, Some(total) if total > 0 && self.completed_size == total)
    }
}

/// A logical download job made of ordered items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Caller-chosen unique key.
    pub key: String,
    pub id: Option<BundleId>,
    pub source: SourceDescriptor,
    /// Download directory; removed recursively on cancel.
    pub dir: PathBuf,
    pub status: TaskStatus,
    /// Resolution completed and items are persisted.
    pub initialized: bool,
    pub total_count: u32,
    pub completed_count: u32,
    pub items: Vec<Item>,
}

impl Bundle {
    pub fn new(key: impl Into<String>, source: SourceDescriptor, dir: impl AsRef<Path>) -> Self {
        Self {
            key: key.into(),
            id: None,
            source,
            dir: dir.as_ref().to_path_buf(),
            status: TaskStatus::Start,
            initialized: false,
            total_count: 0,
            completed_count: 0,
            items: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Finished
    }

    /// Number of items already marked finished.
    pub fn finished_items(&self) -> u32 {
        self.items.iter().filter(|i| i.finished).count() as u32
    }

    /// Copy of the bundle row without its items.
    pub fn summary(&self) -> Bundle {
        Bundle {
            key: self.key.clone(),
            id: self.id,
            source: self.source.clone(),
            dir: self.dir.clone(),
            status: self.status,
            initialized: self.initialized,
            total_count: self.total_count,
            completed_count: self.completed_count,
            items: Vec::new(),
        }
    }

    /// Completed fraction by item count (0.0 when nothing is resolved yet).
    pub fn fraction(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.completed_count as f64 / self.total_count as f64
        }
    }
}
