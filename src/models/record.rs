// src/models/record.rs

//! Publication record and its identity hash.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Separator between identity fields so that ("ab", "c") and ("a", "bc")
/// never hash alike.
const FIELD_SEPARATOR: char = '\u{1f}';

/// One entry of a bulletin issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicationRecord {
    /// Jurisdiction code (e.g. "es")
    pub jurisdiction: String,

    /// Bulletin date this record belongs to
    pub issue_date: NaiveDate,

    pub title: String,

    #[serde(default)]
    pub section: String,

    #[serde(default)]
    pub department: String,

    /// Link to the source document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,

    /// Jurisdiction-specific field that takes part in identity
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub discriminator: String,

    /// Hex SHA-256 over the normalized identity fields
    pub content_hash: String,
}

/// Field values as extracted by a parser, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub title: String,
    pub section: String,
    pub department: String,
    pub document_url: Option<String>,
    pub discriminator: String,
}

impl PublicationRecord {
    /// Build a record, normalizing every text field and deriving the hash.
    pub fn new(jurisdiction: &str, issue_date: NaiveDate, raw: RawRecord) -> Self {
        let title = normalize_text(&raw.title);
        let section = normalize_text(&raw.section);
        let department = normalize_text(&raw.department);
        let discriminator = normalize_text(&raw.discriminator);
        let document_url = raw
            .document_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let content_hash = content_hash(&title, &section, &department, &discriminator);

        Self {
            jurisdiction: jurisdiction.to_string(),
            issue_date,
            title,
            section,
            department,
            document_url,
            discriminator,
            content_hash,
        }
    }

    /// Format the record for display using a template.
    ///
    /// Supported placeholders: `{title}`, `{section}`, `{department}`,
    /// `{url}`, `{date}`, `{jurisdiction}`.
    pub fn format(&self, template: &str) -> String {
        template
            .replace("{title}", &self.title)
            .replace("{section}", or_dash(&self.section))
            .replace("{department}", or_dash(&self.department))
            .replace("{url}", self.document_url.as_deref().unwrap_or("-"))
            .replace("{date}", &self.issue_date.to_string())
            .replace("{jurisdiction}", &self.jurisdiction)
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

/// NFKC-normalize, trim, and collapse internal whitespace.
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfkc().collect();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic fingerprint of already-normalized identity fields.
pub fn content_hash(title: &str, section: &str, department: &str, discriminator: &str) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in [title, section, department, discriminator].iter().enumerate() {
        if i > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn raw(title: &str, section: &str, department: &str) -> RawRecord {
        RawRecord {
            title: title.to_string(),
            section: section.to_string(),
            department: department.to_string(),
            ..RawRecord::default()
        }
    }

    #[test]
    fn trailing_whitespace_does_not_change_identity() {
        let a = PublicationRecord::new("es", date(), raw("Ley X", "I", "Jefatura"));
        let b = PublicationRecord::new("es", date(), raw("Ley X ", "I", "Jefatura"));
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(b.title, "Ley X");
    }

    #[test]
    fn internal_whitespace_is_collapsed() {
        assert_eq!(normalize_text("  Real\n\tDecreto   1/2024 "), "Real Decreto 1/2024");
    }

    #[test]
    fn compatibility_forms_are_folded() {
        // NO-BREAK SPACE and fullwidth digits
        assert_eq!(normalize_text("Ley\u{a0}１２"), "Ley 12");
    }

    #[test]
    fn field_boundaries_matter() {
        assert_ne!(content_hash("ab", "c", "", ""), content_hash("a", "bc", "", ""));
    }

    #[test]
    fn discriminator_takes_part_in_identity() {
        let mut first = raw("Anuncio", "V", "");
        first.discriminator = "BOE-B-2024-1".into();
        let mut second = raw("Anuncio", "V", "");
        second.discriminator = "BOE-B-2024-2".into();
        let a = PublicationRecord::new("es", date(), first);
        let b = PublicationRecord::new("es", date(), second);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn url_is_outside_identity() {
        let mut with_url = raw("Orden", "III", "Ministerio");
        with_url.document_url = Some("https://example.com/a.pdf".into());
        let a = PublicationRecord::new("es", date(), with_url);
        let b = PublicationRecord::new("es", date(), raw("Orden", "III", "Ministerio"));
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn blank_url_becomes_none() {
        let mut r = raw("Orden", "", "");
        r.document_url = Some("   ".into());
        assert!(PublicationRecord::new("es", date(), r).document_url.is_none());
    }

    #[test]
    fn test_format() {
        let record = PublicationRecord::new("es", date(), raw("Ley 1/2024", "I", ""));
        assert_eq!(
            record.format("[{section}] {title} ({department})"),
            "[I] Ley 1/2024 (-)"
        );
    }
}
