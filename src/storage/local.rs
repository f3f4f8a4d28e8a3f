//! Local filesystem storage implementation.
//!
//! Record files are rewritten atomically (temp file, then rename) and the
//! audit trail is an append-only JSON Lines file per jurisdiction.
//! Every write for a jurisdiction happens under that jurisdiction's lock,
//! so concurrent runs for different jurisdictions never contend.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::{AuditEntry, PublicationRecord};
use crate::storage::{RecordStore, StoreResult};

/// Contents of one `records/<code>/<YYYY>/<MM-DD>.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueFile {
    pub jurisdiction: String,
    pub issue_date: NaiveDate,
    /// ISO 8601 timestamp of last update
    pub updated_at: DateTime<Utc>,
    pub count: usize,
    pub records: Vec<PublicationRecord>,
}

impl IssueFile {
    fn new(jurisdiction: &str, issue_date: NaiveDate, records: Vec<PublicationRecord>) -> Self {
        Self {
            jurisdiction: jurisdiction.to_string(),
            issue_date,
            updated_at: Utc::now(),
            count: records.len(),
            records,
        }
    }
}

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Directory name for a jurisdiction; anything outside `[a-z0-9_-]`
    /// becomes `_` so a code can never escape the store root.
    fn partition(jurisdiction: &str) -> String {
        jurisdiction
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn issue_key(jurisdiction: &str, date: NaiveDate) -> String {
        format!(
            "records/{}/{}/{:02}-{:02}.json",
            Self::partition(jurisdiction),
            date.year(),
            date.month(),
            date.day()
        )
    }

    fn audit_key(jurisdiction: &str) -> String {
        format!("audit/{}.jsonl", Self::partition(jurisdiction))
    }

    /// Lock guarding one jurisdiction's partition.
    async fn partition_lock(&self, jurisdiction: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(Self::partition(jurisdiction)).or_default())
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| corrupt(key, e))?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| corrupt(key, e))?,
            )),
            None => Ok(None),
        }
    }

    async fn read_issue(&self, jurisdiction: &str, date: NaiveDate) -> StoreResult<Vec<PublicationRecord>> {
        let key = Self::issue_key(jurisdiction, date);
        Ok(self
            .read_json::<IssueFile>(&key)
            .await?
            .map(|file| file.records)
            .unwrap_or_default())
    }

    /// Issue dates with a file on disk, newest first.
    async fn stored_dates(&self, jurisdiction: &str) -> StoreResult<Vec<NaiveDate>> {
        let dir = self.path(&format!("records/{}", Self::partition(jurisdiction)));
        let mut dates = Vec::new();

        let mut years = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dates),
            Err(e) => return Err(e.into()),
        };
        while let Some(year_dir) = years.next_entry().await? {
            let Some(year) = year_dir
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<i32>().ok())
            else {
                continue;
            };
            let mut days = tokio::fs::read_dir(year_dir.path()).await?;
            while let Some(day_file) = days.next_entry().await? {
                let name = day_file.file_name();
                let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                    continue;
                };
                if let Ok(date) = NaiveDate::parse_from_str(&format!("{year}-{stem}"), "%Y-%m-%d") {
                    dates.push(date);
                }
            }
        }

        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }
}

fn corrupt(key: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl RecordStore for LocalStorage {
    async fn insert_records(
        &self,
        jurisdiction: &str,
        records: &[PublicationRecord],
    ) -> StoreResult<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let lock = self.partition_lock(jurisdiction).await;
        let _guard = lock.lock().await;

        let mut by_date: HashMap<NaiveDate, Vec<&PublicationRecord>> = HashMap::new();
        for record in records {
            by_date.entry(record.issue_date).or_default().push(record);
        }

        let mut inserted = Vec::new();
        for (date, batch) in by_date {
            let mut stored = self.read_issue(jurisdiction, date).await?;
            let mut hashes: HashSet<String> =
                stored.iter().map(|r| r.content_hash.clone()).collect();

            let mut added = Vec::new();
            for record in batch {
                if hashes.insert(record.content_hash.clone()) {
                    stored.push(record.clone());
                    added.push(record.content_hash.clone());
                }
            }
            if added.is_empty() {
                continue;
            }

            let key = Self::issue_key(jurisdiction, date);
            self.write_json(&key, &IssueFile::new(jurisdiction, date, stored))
                .await?;
            log::debug!("Stored {} new records in {}", added.len(), key);
            inserted.extend(added);
        }
        Ok(inserted)
    }

    async fn fetch_records(
        &self,
        jurisdiction: &str,
        issue_date: NaiveDate,
    ) -> StoreResult<Vec<PublicationRecord>> {
        self.read_issue(jurisdiction, issue_date).await
    }

    async fn previous_issue_date(
        &self,
        jurisdiction: &str,
        before: NaiveDate,
    ) -> StoreResult<Option<NaiveDate>> {
        for date in self.stored_dates(jurisdiction).await? {
            if date >= before {
                continue;
            }
            if !self.read_issue(jurisdiction, date).await?.is_empty() {
                return Ok(Some(date));
            }
        }
        Ok(None)
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> StoreResult<()> {
        let key = Self::audit_key(&entry.jurisdiction);
        let mut line = serde_json::to_vec(entry).map_err(|e| corrupt(&key, e))?;
        line.push(b'\n');

        let lock = self.partition_lock(&entry.jurisdiction).await;
        let _guard = lock.lock().await;

        let path = self.path(&key);
        self.ensure_dir(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_audit(&self, jurisdiction: &str) -> StoreResult<Vec<AuditEntry>> {
        let key = Self::audit_key(jurisdiction);
        let Some(bytes) = self.read_bytes(&key).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| corrupt(&key, e)))
            .collect()
    }
}
