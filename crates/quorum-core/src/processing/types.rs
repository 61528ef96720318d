//! Processing dashboard types shared between the reconciler and hosts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side lifecycle of one background job.
///
/// `completed` and `failed` are terminal for an attempt; a retry request
/// re-enters `pending` server-side, never client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Accepted, waiting for a worker
    Pending,
    /// Worker is on it
    Processing,
    /// Done and queryable
    Completed,
    /// Needs an explicit retry to move again
    Failed,
}

impl ProcessingStatus {
    /// Whether the status can still change without an explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Background-job families merged into one dashboard feed.
///
/// The server tracks these in separate collections; the client shows them
/// together and routes retries back to the right one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Notebook document ingestion
    Document,
    /// Council meeting-minute ingestion
    MeetingMinutes,
}

/// One tracked unit of server-side work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEntry {
    pub id: String,
    pub kind: JobKind,
    pub title: String,
    /// Notebook or council the job belongs to
    pub owner: String,
    pub status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts returned with every snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub pending: usize,
    pub processing: usize,
    pub completed_today: usize,
    pub failed_today: usize,
}

impl ProcessingStats {
    /// Anything still moving server-side.
    pub fn has_active(&self) -> bool {
        self.pending > 0 || self.processing > 0
    }
}

/// Point-in-time read of tracked jobs plus aggregate counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub stats: ProcessingStats,
    pub items: Vec<ProcessingEntry>,
}

impl Snapshot {
    /// Whether any tracked unit is non-terminal.
    pub fn has_active(&self) -> bool {
        self.stats.has_active() || self.items.iter().any(|item| !item.status.is_terminal())
    }
}

/// Filter passed to the snapshot endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Status(ProcessingStatus),
}

/// Poll cadence tier.
///
/// Fast while the consumer knows specific items are mid-flight; ambient
/// for badges that only need a coarse "anything active?" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTier {
    Fast,
    Ambient,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ProcessingStatus::Pending.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let parsed: ProcessingStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, ProcessingStatus::Failed);
    }

    #[test]
    fn test_snapshot_active_from_stats_or_items() {
        let mut snapshot = Snapshot::default();
        assert!(!snapshot.has_active());

        snapshot.stats.processing = 1;
        assert!(snapshot.has_active());

        snapshot.stats.processing = 0;
        snapshot.items.push(ProcessingEntry {
            id: "job-1".to_string(),
            kind: JobKind::MeetingMinutes,
            title: "March minutes".to_string(),
            owner: "council-12".to_string(),
            status: ProcessingStatus::Pending,
            error: None,
            created_at: Utc::now(),
        });
        assert!(snapshot.has_active());

        snapshot.items[0].status = ProcessingStatus::Failed;
        assert!(!snapshot.has_active());
    }

    #[test]
    fn test_entry_roundtrip_with_error() {
        let entry = ProcessingEntry {
            id: "job-2".to_string(),
            kind: JobKind::Document,
            title: "budget.pdf".to_string(),
            owner: "notebook-3".to_string(),
            status: ProcessingStatus::Failed,
            error: Some("parse error on page 4".to_string()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"document\""));
        let parsed: ProcessingEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, ProcessingStatus::Failed);
        assert_eq!(parsed.error.as_deref(), Some("parse error on page 4"));
    }
}
