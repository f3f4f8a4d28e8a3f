// src/services/anchors.rs

//! Anchor scan for sources whose markup has no stable item container.

use chrono::NaiveDate;
use scraper::{ElementRef, Selector};

use crate::error::ParseError;
use crate::models::{JurisdictionConfig, PublicationRecord, RawRecord};
use crate::services::fetch::Payload;
use crate::services::parse::{RecordParser, element_text, load_markup, parse_selector};
use crate::utils::resolve;

/// Emits one record per link whose `href` contains a configured pattern,
/// labelled with the closest preceding heading.
pub struct AnchorScanParser {
    href_contains: Vec<String>,
    heading: Selector,
    department: Option<Selector>,
}

impl AnchorScanParser {
    pub fn new(
        href_contains: &[String],
        heading_selector: &str,
        department_selector: Option<&str>,
    ) -> Result<Self, ParseError> {
        if href_contains.iter().all(|p| p.trim().is_empty()) {
            return Err(ParseError::new("href_contains", "at least one pattern is required"));
        }
        Ok(Self {
            href_contains: href_contains
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect(),
            heading: parse_selector(heading_selector)?,
            department: department_selector.map(parse_selector).transpose()?,
        })
    }

    fn wanted(&self, element: &ElementRef<'_>) -> Option<String> {
        if element.value().name() != "a" {
            return None;
        }
        let href = element.value().attr("href")?;
        self.href_contains
            .iter()
            .any(|pattern| href.contains(pattern.as_str()))
            .then(|| href.to_string())
    }
}

impl RecordParser for AnchorScanParser {
    fn parse(
        &self,
        payload: &Payload,
        jurisdiction: &JurisdictionConfig,
        issue_date: NaiveDate,
    ) -> Result<Vec<PublicationRecord>, ParseError> {
        let document = load_markup(payload)?;
        let base = if jurisdiction.base_url.is_empty() {
            payload.source_url.as_str()
        } else {
            jurisdiction.base_url.as_str()
        };

        let mut section = String::new();
        let mut department = String::new();
        let mut records = Vec::new();

        // Pre-order traversal, so a heading is seen before everything it
        // introduces.
        for element in document.root_element().descendants().filter_map(ElementRef::wrap) {
            if self.heading.matches(&element) {
                section = element_text(&element);
            }
            if let Some(sel) = &self.department {
                if sel.matches(&element) {
                    department = element_text(&element);
                }
            }
            let Some(href) = self.wanted(&element) else {
                continue;
            };

            let record = PublicationRecord::new(
                &jurisdiction.code,
                issue_date,
                RawRecord {
                    title: element_text(&element),
                    section: section.clone(),
                    department: department.clone(),
                    document_url: Some(resolve(base, &href)),
                    discriminator: String::new(),
                },
            );
            if !record.title.is_empty() {
                records.push(record);
            }
        }

        log::debug!(
            "Anchor scan found {} records in {}",
            records.len(),
            payload.source_url
        );
        Ok(records)
    }
}
