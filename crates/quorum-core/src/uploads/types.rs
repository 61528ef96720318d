//! Upload item types and aggregate statistics.

use std::path::Path;

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::api::UploadReceipt;

/// One file handed to the queue: display name plus opaque payload bytes.
#[derive(Debug, Clone)]
pub struct FileInput {
    pub name: String,
    pub payload: Bytes,
}

impl FileInput {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Read a file from disk into an input.
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", path.display()))?;
        let payload = tokio::fs::read(path).await?;
        Ok(Self::new(name, payload))
    }

    /// Lower-cased extension, if the name has one.
    pub(crate) fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
    }
}

/// Transfer lifecycle of a queued file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Queued, not yet dispatched
    Pending,
    /// Transfer in flight
    Uploading,
    /// Accepted by the server
    Completed,
    /// Transfer failed; retryable
    Failed,
}

/// Failure reason recorded on an item.
///
/// Authorization failures are distinguished so the host can force a
/// re-login; the queue itself never resets the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum TransferError {
    Unauthorized { message: String },
    Transfer { message: String },
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized { message } => write!(f, "{}", message),
            Self::Transfer { message } => write!(f, "{}", message),
        }
    }
}

/// One user-submitted unit of work tracked by the queue.
///
/// Identity is assigned at intake and never changes; retries mutate the
/// item in place, preserving its position in the queue.
#[derive(Debug, Clone, Serialize)]
pub struct UploadItem {
    pub id: Uuid,
    pub file_name: String,
    #[serde(skip)]
    pub(crate) payload: Bytes,
    pub transfer_status: TransferStatus,
    /// 0-100, monotonically non-decreasing while uploading
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TransferError>,
    /// Present once the transfer completed; its `processing_status` is
    /// what the reconciler subsequently tracks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_result: Option<UploadReceipt>,
}

impl UploadItem {
    pub(crate) fn new(file: FileInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file.name,
            payload: file.payload,
            transfer_status: TransferStatus::Pending,
            progress: 0,
            error: None,
            server_result: None,
        }
    }
}

/// Counts per transfer status, recomputed on every query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
}
