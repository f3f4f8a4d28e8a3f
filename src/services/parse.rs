// src/services/parse.rs

//! Parser abstraction and shared document helpers.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};

use crate::error::ParseError;
use crate::models::{JurisdictionConfig, ParserConfig, PayloadFormat, PublicationRecord};
use crate::services::fetch::Payload;
use crate::services::{AnchorScanParser, RuleParser};

static CDATA: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>"));

/// Turns a fetched payload into publication records.
///
/// Parsers are pure and synchronous: the same payload always yields the
/// same records, in document order.
pub trait RecordParser: Send + Sync {
    fn parse(
        &self,
        payload: &Payload,
        jurisdiction: &JurisdictionConfig,
        issue_date: NaiveDate,
    ) -> Result<Vec<PublicationRecord>, ParseError>;
}

/// Build the parser for a jurisdiction's `parser` section.
///
/// Selectors and rules are checked here, so a broken configuration fails
/// before any network traffic.
pub fn parser_for(config: &ParserConfig) -> Result<Box<dyn RecordParser>, ParseError> {
    let parser: Box<dyn RecordParser> = match config {
        ParserConfig::Rules(rules) => Box::new(RuleParser::new(rules)?),
        ParserConfig::AnchorScan {
            href_contains,
            heading_selector,
            department_selector,
        } => Box::new(AnchorScanParser::new(
            href_contains,
            heading_selector,
            department_selector.as_deref(),
        )?),
    };
    Ok(parser)
}

pub(crate) fn parse_selector(s: &str) -> Result<Selector, ParseError> {
    Selector::parse(s).map_err(|e| ParseError::new(s, format!("invalid selector: {e:?}")))
}

/// Load an HTML or XML payload into a queryable document.
///
/// XML goes through the HTML5 parser as well; CDATA sections are unwrapped
/// first since HTML treats them as comments.
pub(crate) fn load_markup(payload: &Payload) -> Result<Html, ParseError> {
    let trimmed = payload.body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Err(ParseError::new(
            snippet(trimmed),
            format!("expected {} markup, got JSON", payload.format),
        ));
    }
    match payload.format {
        PayloadFormat::Html => Ok(Html::parse_document(&payload.body)),
        PayloadFormat::Xml => {
            if !trimmed.starts_with('<') {
                return Err(ParseError::new(snippet(trimmed), "payload is not XML"));
            }
            Ok(Html::parse_document(&unwrap_cdata(&payload.body)))
        }
        PayloadFormat::Json => Err(ParseError::new(
            snippet(trimmed),
            "JSON payload given to a markup parser",
        )),
    }
}

fn unwrap_cdata(body: &str) -> String {
    let Ok(cdata) = CDATA.as_ref() else {
        return body.to_string();
    };
    cdata
        .replace_all(body, |caps: &regex::Captures<'_>| {
            caps[1]
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
        })
        .into_owned()
}

/// First few characters of a document, for error messages.
pub(crate) fn snippet(text: &str) -> String {
    text.chars().take(40).collect()
}

/// Text nodes of an element joined by single spaces.
pub(crate) fn element_text(element: &scraper::ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(body: &str, format: PayloadFormat) -> Payload {
        Payload {
            body: body.to_string(),
            format,
            source_url: "https://example.org".to_string(),
        }
    }

    #[test]
    fn json_body_is_a_format_mismatch_for_markup() {
        let err = load_markup(&payload(r#"{"data": []}"#, PayloadFormat::Html)).unwrap_err();
        assert!(err.message.contains("got JSON"));
    }

    #[test]
    fn xml_must_start_with_a_tag() {
        assert!(load_markup(&payload("plain text", PayloadFormat::Xml)).is_err());
        assert!(load_markup(&payload("<?xml version=\"1.0\"?><a/>", PayloadFormat::Xml)).is_ok());
    }

    #[test]
    fn cdata_content_stays_readable() {
        let doc = load_markup(&payload(
            "<rss><item><title><![CDATA[Decreto <b>1</b> & anexo]]></title></item></rss>",
            PayloadFormat::Xml,
        ))
        .unwrap();
        let sel = parse_selector("item title").unwrap();
        let title = doc.select(&sel).next().map(|e| element_text(&e)).unwrap();
        assert_eq!(title, "Decreto <b>1</b> & anexo");
    }

    #[test]
    fn every_cdata_section_is_unwrapped() {
        assert!(CDATA.is_ok());
        let body = "<a><![CDATA[x < y]]></a><b><![CDATA[\n1 & 2\n]]></b>";
        assert_eq!(unwrap_cdata(body), "<a>x &lt; y</a><b>\n1 &amp; 2\n</b>");
        assert_eq!(unwrap_cdata("<a>plain</a>"), "<a>plain</a>");
    }

    #[test]
    fn invalid_selector_names_the_fragment() {
        let err = parse_selector("[[invalid").unwrap_err();
        assert_eq!(err.fragment, "[[invalid");
    }

    #[test]
    fn registry_rejects_rules_without_title() {
        let rules = crate::models::ParserRules {
            container: Some("item".into()),
            ..Default::default()
        };
        assert!(parser_for(&ParserConfig::Rules(rules)).is_err());
    }
}
