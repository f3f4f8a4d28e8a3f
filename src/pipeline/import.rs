// src/pipeline/import.rs

//! Offline import of a saved payload.
//!
//! Useful to backfill history from files downloaded by hand or by an older
//! tool: the payload is parsed and persisted exactly like a fetched one,
//! but nothing is notified and no audit entry is written.

use std::path::Path;

use chrono::NaiveDate;

use crate::error::{AppError, Result};
use crate::models::{Config, FetchMethod, JurisdictionConfig, PayloadFormat};
use crate::pipeline::diff::collapse;
use crate::services::{Payload, parser_for};
use crate::storage::RecordStore;

/// Counts reported by an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub parsed: usize,
    pub inserted: usize,
}

/// Format a jurisdiction's adapter normally produces.
pub fn native_format(jurisdiction: &JurisdictionConfig) -> PayloadFormat {
    match jurisdiction.fetch {
        FetchMethod::DirectHttp { format, .. } => format,
        FetchMethod::HeadlessBrowser { .. } => PayloadFormat::Html,
        FetchMethod::SpecializedApi { .. } => PayloadFormat::Json,
    }
}

/// Parse `file` as the bulletin of `code` for `date` and store its records.
pub async fn import_payload(
    config: &Config,
    store: &dyn RecordStore,
    code: &str,
    date: NaiveDate,
    file: &Path,
    format: Option<PayloadFormat>,
) -> Result<ImportSummary> {
    let jurisdiction = config
        .jurisdiction(code)
        .ok_or_else(|| AppError::config(format!("unknown jurisdiction '{code}'")))?;

    let body = tokio::fs::read_to_string(file).await?;
    let payload = Payload {
        body,
        format: format.unwrap_or_else(|| native_format(jurisdiction)),
        source_url: file.display().to_string(),
    };

    let parser = parser_for(&jurisdiction.parser)?;
    let records = parser.parse(&payload, jurisdiction, date)?;
    let parsed = records.len();

    let inserted = store
        .insert_records(&jurisdiction.code, &collapse(records))
        .await?
        .len();
    log::info!(
        "Imported {} for {} {}: {} parsed, {} new",
        file.display(),
        jurisdiction.code,
        date,
        parsed,
        inserted
    );

    Ok(ImportSummary { parsed, inserted })
}
