//! Background-processing status tracking.
//!
//! Once a transfer is accepted, the real work (parsing, indexing) happens
//! asynchronously on the server. The types here model that lifecycle and
//! the reconciler keeps local knowledge of it eventually consistent.

mod reconciler;
mod types;

pub use reconciler::StatusReconciler;
pub use types::{
    JobKind, PollTier, ProcessingEntry, ProcessingStats, ProcessingStatus, Snapshot, StatusFilter,
};
