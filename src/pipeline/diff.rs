//! Deduplication and change detection for one bulletin issue.
//!
//! Computes which parsed records are new for `(jurisdiction, issue_date)`
//! and, for sources that replace their content daily, which records of
//! the previous published issue disappeared.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ComparisonMode, PublicationRecord};

/// Added and removed records for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffResult {
    pub jurisdiction: String,
    pub issue_date: NaiveDate,
    /// Records new for this issue date
    pub added: Vec<PublicationRecord>,
    /// Records of the baseline issue missing from this one
    pub removed: Vec<PublicationRecord>,
    /// Records produced by the parser, duplicates included
    pub total_fetched: usize,
    /// Issue date removals were computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_date: Option<NaiveDate>,
}

impl DiffResult {
    /// An empty result, for runs where the source published nothing.
    pub fn empty(jurisdiction: &str, issue_date: NaiveDate) -> Self {
        Self {
            jurisdiction: jurisdiction.to_string(),
            issue_date,
            added: Vec::new(),
            removed: Vec::new(),
            total_fetched: 0,
            baseline_date: None,
        }
    }

    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// The diff plus the records that still need to be stored.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub result: DiffResult,
    pub to_persist: Vec<PublicationRecord>,
}

/// Hash-based diff engine.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    comparison: ComparisonMode,
}

impl DiffEngine {
    pub fn new(comparison: ComparisonMode) -> Self {
        Self { comparison }
    }

    /// Compare a freshly parsed issue with what is already stored.
    ///
    /// `persisted_same_date` drives idempotence: anything already stored
    /// for this date is neither re-persisted nor reported again.
    /// `previous` is the last published issue before this one and is only
    /// consulted for `Replace` sources.
    pub fn compute(
        &self,
        jurisdiction: &str,
        issue_date: NaiveDate,
        current: Vec<PublicationRecord>,
        persisted_same_date: &[PublicationRecord],
        previous: Option<&[PublicationRecord]>,
    ) -> DiffOutcome {
        let total_fetched = current.len();
        let current = collapse(current);

        let persisted: HashSet<&str> = persisted_same_date
            .iter()
            .map(|r| r.content_hash.as_str())
            .collect();
        let to_persist: Vec<PublicationRecord> = current
            .iter()
            .filter(|r| !persisted.contains(r.content_hash.as_str()))
            .cloned()
            .collect();

        let baseline = match self.comparison {
            ComparisonMode::Replace => previous.filter(|p| !p.is_empty()),
            ComparisonMode::AppendOnly => None,
        };

        let (added, removed) = match baseline {
            None => (to_persist.clone(), Vec::new()),
            Some(previous) => {
                let previous_hashes: HashSet<&str> =
                    previous.iter().map(|r| r.content_hash.as_str()).collect();
                let added = to_persist
                    .iter()
                    .filter(|r| !previous_hashes.contains(r.content_hash.as_str()))
                    .cloned()
                    .collect();

                // An empty issue means nothing was published, not that
                // everything was withdrawn.
                let removed = if current.is_empty() {
                    Vec::new()
                } else {
                    let current_hashes: HashSet<&str> =
                        current.iter().map(|r| r.content_hash.as_str()).collect();
                    collapse(
                        previous
                            .iter()
                            .filter(|r| !current_hashes.contains(r.content_hash.as_str()))
                            .cloned()
                            .collect(),
                    )
                };
                (added, removed)
            }
        };

        DiffOutcome {
            result: DiffResult {
                jurisdiction: jurisdiction.to_string(),
                issue_date,
                added,
                removed,
                total_fetched,
                baseline_date: baseline.and_then(|p| p.first()).map(|r| r.issue_date),
            },
            to_persist,
        }
    }
}

/// Keep the first record of each content hash, preserving order.
pub fn collapse(records: Vec<PublicationRecord>) -> Vec<PublicationRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.content_hash.clone()))
        .collect()
}
