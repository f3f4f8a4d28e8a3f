// src/models/audit.rs

//! Run audit trail and pipeline state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    /// Data stored, notification not delivered
    Partial,
    Failed,
}

impl RunStatus {
    /// Process exit code for an external scheduler.
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::Partial => 2,
        }
    }

    /// Worst status of a multi-jurisdiction run (`Success` when empty).
    pub fn worst(statuses: impl IntoIterator<Item = RunStatus>) -> RunStatus {
        statuses.into_iter().max().unwrap_or(RunStatus::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Fetching,
    Parsing,
    Diffing,
    Persisting,
    Notifying,
    Done,
    Failed,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStage::Fetching => "fetching",
            RunStage::Parsing => "parsing",
            RunStage::Diffing => "diffing",
            RunStage::Persisting => "persisting",
            RunStage::Notifying => "notifying",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One append-only row per pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub jurisdiction: String,
    pub issue_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default)]
    pub records_fetched: usize,
    pub records_added: usize,
    pub records_removed: usize,
    #[serde(default)]
    pub fetch_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Accumulates audit fields while a run is in flight.
///
/// `finish` consumes the draft, so an entry can only be produced once.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub jurisdiction: String,
    pub issue_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub records_fetched: usize,
    pub records_added: usize,
    pub records_removed: usize,
    pub fetch_attempts: u32,
}

impl AuditDraft {
    pub fn start(jurisdiction: &str, issue_date: NaiveDate) -> Self {
        Self {
            jurisdiction: jurisdiction.to_string(),
            issue_date,
            started_at: Utc::now(),
            records_fetched: 0,
            records_added: 0,
            records_removed: 0,
            fetch_attempts: 0,
        }
    }

    pub fn finish(self, status: RunStatus, error_detail: Option<String>) -> AuditEntry {
        AuditEntry {
            jurisdiction: self.jurisdiction,
            issue_date: self.issue_date,
            started_at: self.started_at,
            finished_at: Utc::now(),
            status,
            records_fetched: self.records_fetched,
            records_added: self.records_added,
            records_removed: self.records_removed,
            fetch_attempts: self.fetch_attempts,
            // Only non-success runs carry a detail.
            error_detail: if status == RunStatus::Success {
                None
            } else {
                error_detail
            },
        }
    }
}
