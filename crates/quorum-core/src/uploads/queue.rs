//! Bounded-concurrency upload queue.
//!
//! Pending items are drained in batches of `max_concurrent_uploads`; each
//! batch is dispatched concurrently and awaited as a unit, so batch N+1
//! never starts before batch N has fully settled. This bounds peak network
//! connections without a generic worker pool.

use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ApiError, TransferClient, UploadReceipt};
use crate::config::Config;

use super::types::{FileInput, TransferError, TransferStatus, UploadItem, UploadStats};

/// Progress shown as soon as a transfer is dispatched, before any
/// acknowledgement, so the user sees immediate movement.
const DISPATCH_PROGRESS: u8 = 10;

/// Queue misuse errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// A previous `start_upload` call has not resolved yet
    #[error("an upload pass is already running")]
    UploadInProgress,
}

/// Listener for per-item transfer completion.
///
/// The host wires this to the status reconciler so accepted uploads whose
/// processing is still non-terminal re-arm fast polling.
pub trait UploadListener: Send + Sync {
    fn uploaded(&self, item_id: Uuid, receipt: &UploadReceipt);
}

/// No-op implementation for hosts that do not track processing
pub struct NoOpListener;

impl UploadListener for NoOpListener {
    fn uploaded(&self, _item_id: Uuid, _receipt: &UploadReceipt) {}
}

/// User-curated list of pending file transfers.
///
/// Items keep their intake identity and queue position across every
/// status transition; display order is submission order.
pub struct UploadQueue {
    items: RwLock<Vec<UploadItem>>,
    client: Arc<dyn TransferClient>,
    listener: Arc<dyn UploadListener>,
    max_concurrent: usize,
    allowed_extensions: Vec<String>,
    /// Held for the duration of one `start_upload` pass
    drain_lock: Mutex<()>,
    /// Cancellation for the pass in flight
    active_pass: Mutex<CancellationToken>,
}

impl UploadQueue {
    pub fn new(
        client: Arc<dyn TransferClient>,
        listener: Arc<dyn UploadListener>,
        config: &Config,
    ) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            client,
            listener,
            max_concurrent: config.max_concurrent_uploads.max(1),
            allowed_extensions: config.allowed_extensions.clone(),
            drain_lock: Mutex::new(()),
            active_pass: Mutex::new(CancellationToken::new()),
        }
    }

    /// Append allow-listed files as pending items, in submission order.
    ///
    /// Files failing the filter are dropped without surfacing an error;
    /// the return value is how many were accepted, so hosts can notice
    /// the difference.
    pub async fn add_files(&self, files: Vec<FileInput>) -> usize {
        let mut items = self.items.write().await;
        let mut accepted = 0;
        for file in files {
            let allowed = file
                .extension()
                .map(|ext| self.allowed_extensions.iter().any(|a| *a == ext))
                .unwrap_or(false);
            if !allowed {
                tracing::debug!(file = %file.name, "Rejected file type at intake");
                continue;
            }
            items.push(UploadItem::new(file));
            accepted += 1;
        }
        accepted
    }

    /// Remove an item. Unknown ids are a no-op; an item whose transfer is
    /// in flight is left alone.
    pub async fn remove(&self, id: Uuid) {
        let mut items = self.items.write().await;
        items.retain(|item| item.id != id || item.transfer_status == TransferStatus::Uploading);
    }

    /// Move every failed item back to pending, in place. Does not start
    /// an upload pass; call `start_upload` again for that.
    pub async fn retry_failed(&self) -> usize {
        let mut items = self.items.write().await;
        let mut reset = 0;
        for item in items
            .iter_mut()
            .filter(|item| item.transfer_status == TransferStatus::Failed)
        {
            item.transfer_status = TransferStatus::Pending;
            item.error = None;
            item.progress = 0;
            reset += 1;
        }
        reset
    }

    /// Drop completed items.
    pub async fn clear_completed(&self) {
        self.items
            .write()
            .await
            .retain(|item| item.transfer_status != TransferStatus::Completed);
    }

    /// Drop everything, unless a transfer is in flight (clearing would
    /// orphan it), in which case nothing changes.
    pub async fn clear_all(&self) {
        let mut items = self.items.write().await;
        if items
            .iter()
            .any(|item| item.transfer_status == TransferStatus::Uploading)
        {
            tracing::debug!("clear_all skipped: transfer in flight");
            return;
        }
        items.clear();
    }

    /// Counts per status, derived on every call.
    pub async fn stats(&self) -> UploadStats {
        let items = self.items.read().await;
        let mut stats = UploadStats {
            total: items.len(),
            ..UploadStats::default()
        };
        for item in items.iter() {
            match item.transfer_status {
                TransferStatus::Pending => stats.pending += 1,
                TransferStatus::Uploading => stats.uploading += 1,
                TransferStatus::Completed => stats.completed += 1,
                TransferStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Current items, in submission order.
    pub async fn items(&self) -> Vec<UploadItem> {
        self.items.read().await.clone()
    }

    /// Stop scheduling new batches. The batch already in flight runs to
    /// completion; remaining items stay pending.
    pub async fn cancel(&self) {
        self.active_pass.lock().await.cancel();
    }

    /// Drain all pending items in batches of `max_concurrent_uploads`.
    ///
    /// A second call while a pass is running returns
    /// `QueueError::UploadInProgress` rather than interleaving two drains
    /// over the same queue.
    pub async fn start_upload(&self) -> Result<(), QueueError> {
        let _guard = self
            .drain_lock
            .try_lock()
            .map_err(|_| QueueError::UploadInProgress)?;

        let cancel = CancellationToken::new();
        *self.active_pass.lock().await = cancel.clone();

        loop {
            if cancel.is_cancelled() {
                tracing::debug!("Upload pass cancelled between batches");
                break;
            }

            let batch = self.claim_batch().await;
            if batch.is_empty() {
                break;
            }

            let transfers = batch
                .into_iter()
                .map(|(id, file)| self.transfer_one(id, file));
            join_all(transfers).await;
        }

        Ok(())
    }

    /// Claim the next batch of pending items in queue order, marking each
    /// as uploading under one write lock.
    async fn claim_batch(&self) -> Vec<(Uuid, FileInput)> {
        let mut items = self.items.write().await;
        let mut batch = Vec::with_capacity(self.max_concurrent);
        for item in items.iter_mut() {
            if batch.len() == self.max_concurrent {
                break;
            }
            if item.transfer_status == TransferStatus::Pending {
                item.transfer_status = TransferStatus::Uploading;
                item.progress = DISPATCH_PROGRESS;
                batch.push((
                    item.id,
                    FileInput::new(item.file_name.clone(), item.payload.clone()),
                ));
            }
        }
        batch
    }

    async fn transfer_one(&self, id: Uuid, file: FileInput) {
        match self.client.upload(&file).await {
            Ok(receipt) => {
                {
                    let mut items = self.items.write().await;
                    if let Some(item) = items.iter_mut().find(|item| item.id == id) {
                        item.transfer_status = TransferStatus::Completed;
                        item.progress = 100;
                        item.error = None;
                        item.server_result = Some(receipt.clone());
                    }
                }
                tracing::debug!(item = %id, document = %receipt.document_id, "Transfer completed");
                self.listener.uploaded(id, &receipt);
            }
            Err(err) => {
                let error = match &err {
                    ApiError::Unauthorized => TransferError::Unauthorized {
                        message: "Session expired - please sign in again".to_string(),
                    },
                    other => TransferError::Transfer {
                        message: other.to_string(),
                    },
                };
                tracing::warn!(item = %id, file = %file.name, error = %err, "Transfer failed");
                let mut items = self.items.write().await;
                if let Some(item) = items.iter_mut().find(|item| item.id == id) {
                    item.transfer_status = TransferStatus::Failed;
                    item.error = Some(error);
                    item.server_result = None;
                }
            }
        }
    }
}
