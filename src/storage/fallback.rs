//! Secondary audit sink for when the primary store rejects an entry.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use crate::models::AuditEntry;

/// Best-effort JSON Lines file shared by all jurisdictions.
#[derive(Debug, Clone)]
pub struct FallbackAuditLog {
    path: PathBuf,
}

impl FallbackAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append an entry; returns whether it reached the file.
    ///
    /// When even this write fails the entry is logged at error level so
    /// it is not lost silently.
    pub async fn record(&self, entry: &AuditEntry) -> bool {
        match self.append(entry).await {
            Ok(()) => {
                log::warn!(
                    "Audit entry for {} written to fallback log {}",
                    entry.jurisdiction,
                    self.path.display()
                );
                true
            }
            Err(e) => {
                log::error!(
                    "Fallback audit log {} failed ({}); entry: {:?}",
                    self.path.display(),
                    e,
                    entry
                );
                false
            }
        }
    }

    async fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}
