//! Resumable single-item transfer.

use tokio::io::AsyncReadExt;

use super::Task;
use crate::control::AbortSignal;
use crate::error::{NetworkError, TaskError};
use crate::model::Item;
use crate::storage::{resume_offset, ItemFile};
use crate::transport::{range_from, BodyReader};

impl Task {
    /// Bring `item` up to date with its remote file. `item` reflects the
    /// progress made even when an error is returned.
    pub(super) async fn download_file(&self, epoch: u64, item: &mut Item) -> Result<(), TaskError> {
        let mut file = ItemFile::open(&item.local_path())
            .await
            .map_err(TaskError::Storage)?;
        let on_disk = file.len().await.map_err(TaskError::Storage)?;
        let offset = resume_offset(item.completed_size, on_disk);
        if offset != item.completed_size {
            tracing::debug!(
                key = %self.key, item = item.seq,
                checkpoint = item.completed_size, on_disk,
                "resume offset clamped to file length"
            );
            item.completed_size = offset;
        }

        if item.is_complete() {
            item.finished = true;
            return self.checkpoint(item, &mut file).await;
        }
        file.seek_to(offset).await.map_err(TaskError::Storage)?;

        let signal = AbortSignal::new();
        *self.inflight.lock().unwrap() = Some(signal.clone());
        if self.is_interrupted(epoch) {
            signal.abort();
        }
        let result = self.transfer(epoch, item, &mut file, &signal).await;
        *self.inflight.lock().unwrap() = None;
        result
    }

    async fn transfer(
        &self,
        epoch: u64,
        item: &mut Item,
        file: &mut ItemFile,
        signal: &AbortSignal,
    ) -> Result<(), TaskError> {
        let mut offset = item.completed_size;
        let response = self
            .ctx
            .transport
            .ranged_get(&item.url, &range_from(offset), signal.clone())
            .await
            .map_err(|source| NetworkError::Transport {
                url: item.url.clone(),
                source,
            })?;
        if !response.is_success() {
            return Err(NetworkError::HttpStatus {
                url: item.url.clone(),
                status: response.status,
            }
            .into());
        }
        if offset > 0 && !response.is_partial() {
            tracing::info!(
                key = %self.key, item = item.seq, path = %file.path().display(),
                "range ignored by server; restarting item"
            );
            file.restart().await.map_err(TaskError::Storage)?;
            offset = 0;
            item.completed_size = 0;
        }
        if item.total_size.is_none() {
            item.total_size = response.resource_size(offset);
        }
        tracing::debug!(
            key = %self.key, item = item.seq, offset,
            total = ?item.total_size, status = response.status,
            "transfer started"
        );
        self.stream_body(epoch, item, file, signal, response.body).await
    }

    async fn stream_body(
        &self,
        epoch: u64,
        item: &mut Item,
        file: &mut ItemFile,
        signal: &AbortSignal,
        mut body: BodyReader,
    ) -> Result<(), TaskError> {
        let expected = item.total_size;
        let threshold = self.ctx.transfer.checkpoint_threshold(expected);
        let mut buf = vec![0u8; self.ctx.transfer.chunk_bytes.max(1)];
        let mut unflushed = 0u64;

        loop {
            if self.is_interrupted(epoch) {
                self.checkpoint_tail(item, file, unflushed).await;
                return Ok(());
            }
            let read = tokio::select! {
                biased;
                _ = signal.aborted() => None,
                read = body.read(&mut buf) => Some(read),
            };
            let n = match read {
                None => {
                    self.checkpoint_tail(item, file, unflushed).await;
                    return Ok(());
                }
                Some(Ok(n)) => n,
                Some(Err(source)) => {
                    self.checkpoint_tail(item, file, unflushed).await;
                    return Err(NetworkError::Body {
                        url: item.url.clone(),
                        source,
                    }
                    .into());
                }
            };
            if n == 0 {
                break;
            }

            let mut chunk = &buf[..n];
            let overrun = match expected {
                Some(total) if item.completed_size + n as u64 > total => {
                    chunk = &chunk[..(total - item.completed_size) as usize];
                    true
                }
                _ => false,
            };
            file.write_all(chunk).await.map_err(TaskError::Storage)?;
            item.completed_size += chunk.len() as u64;
            unflushed += chunk.len() as u64;

            if overrun {
                self.checkpoint_tail(item, file, unflushed).await;
                return Err(NetworkError::Overrun {
                    url: item.url.clone(),
                    expected: expected.unwrap_or_default(),
                }
                .into());
            }
            if unflushed >= threshold {
                self.checkpoint(item, file).await?;
                unflushed = 0;
            }
        }

        let total = *item.total_size.get_or_insert(item.completed_size);
        if total == 0 {
            return Err(NetworkError::EmptyBody {
                url: item.url.clone(),
            }
            .into());
        }
        if item.completed_size < total {
            self.checkpoint_tail(item, file, unflushed).await;
            return Err(NetworkError::PartialTransfer {
                url: item.url.clone(),
                received: item.completed_size,
                expected: total,
            }
            .into());
        }
        item.finished = true;
        self.checkpoint(item, file).await?;
        tracing::debug!(
            key = %self.key, item = item.seq, bytes = total, path = %file.path().display(),
            "item finished"
        );
        Ok(())
    }

    /// fsync, then persist the item's progress.
    async fn checkpoint(&self, item: &Item, file: &mut ItemFile) -> Result<(), TaskError> {
        file.sync().await.map_err(TaskError::Storage)?;
        self.ctx
            .store
            .update_item(item)
            .await
            .map_err(TaskError::Storage)
    }

    /// Checkpoint leftover bytes on the way out of an interrupted or failed
    /// transfer. Failures are logged only.
    async fn checkpoint_tail(&self, item: &Item, file: &mut ItemFile, unflushed: u64) {
        if unflushed == 0 {
            return;
        }
        if let Err(e) = self.checkpoint(item, file).await {
            tracing::warn!(key = %self.key, item = item.seq, "checkpoint on exit failed: {}", e);
        }
    }
}
