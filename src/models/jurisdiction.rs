// src/models/jurisdiction.rs

//! Per-jurisdiction source configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Static description of one bulletin source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionConfig {
    /// Short code, e.g. "es" or "fr"
    pub code: String,

    /// Human-readable name used in notifications
    pub display_name: String,

    /// Base URL for resolving relative document links
    #[serde(default)]
    pub base_url: String,

    /// Endpoint URL with date placeholders (see `utils::template`)
    pub endpoint_template: String,

    /// Whether the source replaces its daily content or only appends
    #[serde(default)]
    pub comparison: ComparisonMode,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Only report records mentioning one of these (case-insensitive)
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Retrieval strategy
    pub fetch: FetchMethod,

    /// Extraction strategy
    pub parser: ParserConfig,
}

fn default_true() -> bool {
    true
}

impl JurisdictionConfig {
    /// Name of the fetch method, as written in the configuration.
    pub fn fetch_method_name(&self) -> &'static str {
        match self.fetch {
            FetchMethod::DirectHttp { .. } => "direct_http",
            FetchMethod::HeadlessBrowser { .. } => "headless_browser",
            FetchMethod::SpecializedApi { .. } => "specialized_api",
        }
    }

    /// Static checks on one jurisdiction's own settings.
    pub fn validate(&self) -> Result<()> {
        let code = self.code.trim();
        if code.is_empty() {
            return Err(AppError::validation("jurisdiction with empty code"));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::validation(format!(
                "jurisdiction code '{}' must be alphanumeric",
                self.code
            )));
        }
        if self.endpoint_template.trim().is_empty() {
            return Err(AppError::validation(format!(
                "jurisdiction '{}' has no endpoint_template",
                self.code
            )));
        }
        Ok(())
    }
}

/// How yesterday's records relate to today's.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// The source only ever adds entries; removals are never computed.
    #[default]
    AppendOnly,
    /// Each issue replaces the previous one; absent entries were removed.
    Replace,
}

/// Format tag attached to a fetched payload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Html,
    Xml,
    Json,
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PayloadFormat::Html => "html",
            PayloadFormat::Xml => "xml",
            PayloadFormat::Json => "json",
        };
        f.write_str(name)
    }
}

/// Retrieval strategy, tagged by `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FetchMethod {
    DirectHttp {
        #[serde(default)]
        format: PayloadFormat,
        #[serde(default = "default_true")]
        verify_tls: bool,
    },
    HeadlessBrowser {
        /// Virtual time budget given to the page's scripts
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
    SpecializedApi {
        /// Regex with one capture group, applied to the endpoint page
        id_pattern: String,
        /// Endpoint receiving the form POST
        api_url: String,
        /// Form fields; `{id}` is replaced by the captured id
        #[serde(default)]
        form: BTreeMap<String, String>,
    },
}

fn default_settle_ms() -> u64 {
    3000
}

/// Extraction strategy, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParserConfig {
    /// Generic field-mapping rules for HTML, XML and JSON feeds.
    Rules(ParserRules),
    /// Anchor scan for irregular markup.
    AnchorScan {
        href_contains: Vec<String>,
        #[serde(default = "default_heading_selector")]
        heading_selector: String,
        #[serde(default)]
        department_selector: Option<String>,
    },
}

fn default_heading_selector() -> String {
    "h1, h2, h3".to_string()
}

/// Field mapping rules for `ParserConfig::Rules`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParserRules {
    /// CSS selector of one item (HTML/XML)
    #[serde(default)]
    pub container: Option<String>,

    /// Dotted path to the item array (JSON), e.g. "data" or "result.items"
    #[serde(default)]
    pub items_path: Option<String>,

    /// Field name -> rule. Recognised names: title, section, department,
    /// url, discriminator.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,
}

/// How to extract one field from an item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRule {
    /// CSS selector relative to the container (HTML/XML)
    #[serde(default)]
    pub selector: Option<String>,

    /// Dotted path relative to the item (JSON); may contain `{key}`
    /// placeholders to compose a value from several keys
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub extract: Extract,

    /// Attribute name for `attr` / `ancestor_attr`
    #[serde(default)]
    pub attr: Option<String>,

    /// Value used when nothing matches
    #[serde(default)]
    pub default: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Extract {
    #[default]
    Text,
    Attr,
    /// Attribute of the closest ancestor matching `selector`
    AncestorAttr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_http_jurisdiction() {
        let toml_str = r#"
            code = "es"
            display_name = "BOE"
            endpoint_template = "https://www.boe.es/datosabiertos/api/boe/sumario/{date_ymd}"
            comparison = "replace"

            [fetch]
            method = "direct_http"
            format = "xml"

            [parser]
            kind = "rules"
            container = "item"

            [parser.fields.title]
            selector = "titulo"

            [parser.fields.section]
            selector = "seccion"
            extract = "ancestor_attr"
            attr = "nombre"
        "#;
        let j: JurisdictionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(j.code, "es");
        assert!(j.enabled);
        assert_eq!(j.comparison, ComparisonMode::Replace);
        assert_eq!(j.fetch_method_name(), "direct_http");
        match &j.fetch {
            FetchMethod::DirectHttp { format, verify_tls } => {
                assert_eq!(*format, PayloadFormat::Xml);
                assert!(*verify_tls);
            }
            other => panic!("unexpected fetch method {other:?}"),
        }
        match &j.parser {
            ParserConfig::Rules(rules) => {
                assert_eq!(rules.container.as_deref(), Some("item"));
                assert_eq!(rules.fields["section"].extract, Extract::AncestorAttr);
            }
            other => panic!("unexpected parser {other:?}"),
        }
    }

    #[test]
    fn comparison_defaults_to_append_only() {
        let toml_str = r#"
            code = "fr"
            display_name = "JORF"
            endpoint_template = "https://example.org/{year}/{month}/{day}"

            [fetch]
            method = "headless_browser"

            [parser]
            kind = "anchor_scan"
            href_contains = ["/jorf/id/"]
        "#;
        let j: JurisdictionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(j.comparison, ComparisonMode::AppendOnly);
        assert!(matches!(j.fetch, FetchMethod::HeadlessBrowser { settle_ms: 3000 }));
        match j.parser {
            ParserConfig::AnchorScan {
                heading_selector, ..
            } => assert_eq!(heading_selector, "h1, h2, h3"),
            other => panic!("unexpected parser {other:?}"),
        }
    }
}
