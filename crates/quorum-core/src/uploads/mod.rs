//! File upload queue.
//!
//! Files enter through an extension allow-list, become tracked items, and
//! are dispatched to the transfer endpoint with bounded concurrency.

mod queue;
mod types;

pub use queue::{NoOpListener, QueueError, UploadListener, UploadQueue};
pub use types::{FileInput, TransferError, TransferStatus, UploadItem, UploadStats};
