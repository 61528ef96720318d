//! Remote API contracts for the Quorum backend
//!
//! The backend does the heavy lifting (parsing, indexing, persistence);
//! the client talks to three endpoints: file transfer, processing
//! snapshot, and job retry. Each is consumed through a trait so the queue
//! and reconciler can be exercised against scripted clients in tests.

mod http;

pub use http::HttpApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processing::{JobKind, ProcessingStatus, Snapshot, StatusFilter};
use crate::uploads::FileInput;

/// Errors returned by the remote API layer
#[derive(Debug, Error)]
pub enum ApiError {
    /// Session missing or expired. The host may force a re-login; this
    /// layer only reports it.
    #[error("not authorized")]
    Unauthorized,

    /// Server answered with a non-success status
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Transport-level failure (unreachable host, timeout, TLS)
    #[error("network error: {0}")]
    Network(String),

    /// Body did not match the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Successful transfer acknowledgement.
///
/// The document id is server-assigned. `processing_status` is the state of
/// the asynchronous server-side work at the moment of acceptance, almost
/// always still `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub document_id: String,
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// File transfer endpoint
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Upload one file's bytes plus metadata.
    async fn upload(&self, file: &FileInput) -> Result<UploadReceipt, ApiError>;
}

/// Processing snapshot and retry endpoints
#[async_trait]
pub trait ProcessingClient: Send + Sync {
    /// Pull current state for all units matching the filter.
    async fn fetch_snapshot(&self, filter: StatusFilter) -> Result<Snapshot, ApiError>;

    /// Ask the server to re-run a failed unit. Acknowledgement only;
    /// callers re-fetch the snapshot to observe the new state.
    async fn retry(&self, kind: JobKind, id: &str) -> Result<(), ApiError>;
}
