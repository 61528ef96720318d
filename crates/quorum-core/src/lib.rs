//! Quorum client core - upload queue and processing status reconciliation
//!
//! The Quorum backend owns retrieval, document parsing, and persistence;
//! this crate holds the client-side pieces with real state:
//! - Upload queue with bounded-concurrency transfer dispatch
//! - Status reconciliation against asynchronous server-side processing
//! - Remote API contracts (transfer, snapshot, retry)

pub mod api;
pub mod config;
pub mod processing;
pub mod uploads;

pub use api::{ApiError, HttpApi, ProcessingClient, TransferClient, UploadReceipt};
pub use config::Config;
pub use processing::{
    JobKind, PollTier, ProcessingEntry, ProcessingStats, ProcessingStatus, Snapshot, StatusFilter,
    StatusReconciler,
};
pub use uploads::{
    FileInput, NoOpListener, QueueError, TransferError, TransferStatus, UploadItem,
    UploadListener, UploadQueue, UploadStats,
};
