//! Storage abstractions for records and the run audit trail.
//!
//! ## Directory Structure
//!
//! ```text
//! {root}/
//! ├── records/
//! │   └── es/
//! │       └── 2024/
//! │           ├── 01-01.json    # one file per issue date
//! │           └── 01-02.json
//! └── audit/
//!     └── es.jsonl              # append-only, one entry per run
//! ```

pub mod fallback;
pub mod local;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::StoreError;
use crate::models::{AuditEntry, PublicationRecord};

// Re-export for convenience
pub use fallback::FallbackAuditLog;
pub use local::LocalStorage;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Jurisdiction-partitioned record and audit storage.
///
/// Implementations own the uniqueness of `(jurisdiction, issue_date,
/// content_hash)`: `insert_records` silently skips records that are
/// already stored, whatever the caller computed beforehand.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store records, returning the content hashes that were actually new.
    async fn insert_records(
        &self,
        jurisdiction: &str,
        records: &[PublicationRecord],
    ) -> StoreResult<Vec<String>>;

    /// Records stored for one issue date, in insertion order.
    async fn fetch_records(
        &self,
        jurisdiction: &str,
        issue_date: NaiveDate,
    ) -> StoreResult<Vec<PublicationRecord>>;

    /// Most recent date strictly before `before` that has stored records.
    async fn previous_issue_date(
        &self,
        jurisdiction: &str,
        before: NaiveDate,
    ) -> StoreResult<Option<NaiveDate>>;

    /// Append one entry to the audit trail.
    async fn append_audit_entry(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Audit entries for a jurisdiction, oldest first.
    async fn load_audit(&self, jurisdiction: &str) -> StoreResult<Vec<AuditEntry>>;
}
