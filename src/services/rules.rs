// src/services/rules.rs

//! Configuration-driven field extraction for HTML, XML and JSON feeds.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Selector};
use serde_json::Value;

use crate::error::ParseError;
use crate::models::{
    Extract, FieldRule, JurisdictionConfig, ParserRules, PayloadFormat, PublicationRecord,
    RawRecord,
};
use crate::services::fetch::Payload;
use crate::services::parse::{
    RecordParser, element_text, load_markup, parse_selector, snippet,
};
use crate::utils::resolve;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Section,
    Department,
    Url,
    Discriminator,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "title" => Some(Self::Title),
            "section" => Some(Self::Section),
            "department" => Some(Self::Department),
            "url" => Some(Self::Url),
            "discriminator" => Some(Self::Discriminator),
            _ => None,
        }
    }
}

struct CompiledRule {
    field: Field,
    selector: Option<Selector>,
    path: Option<String>,
    extract: Extract,
    attr: String,
    default: String,
}

/// Parser driven by `ParserRules`: a container selector or JSON items path,
/// plus one extraction rule per record field.
pub struct RuleParser {
    container: Option<Selector>,
    items_path: Option<String>,
    rules: Vec<CompiledRule>,
    placeholder: Regex,
    /// Selector or path of the title rule, named when no item yields a title
    title_source: String,
}

impl RuleParser {
    pub fn new(config: &ParserRules) -> Result<Self, ParseError> {
        if config.container.is_none() && config.items_path.is_none() {
            return Err(ParseError::new(
                "parser",
                "rules need a container selector or an items_path",
            ));
        }
        let Some(title_rule) = config.fields.get("title") else {
            return Err(ParseError::new("fields", "a title rule is required"));
        };
        let title_source = title_rule
            .selector
            .clone()
            .or_else(|| title_rule.path.clone())
            .unwrap_or_else(|| "title".to_string());

        let container = config.container.as_deref().map(parse_selector).transpose()?;

        let mut rules = Vec::with_capacity(config.fields.len());
        for (name, rule) in &config.fields {
            let field = Field::from_name(name)
                .ok_or_else(|| ParseError::new(name.as_str(), "unknown field name"))?;
            rules.push(Self::compile(name, field, rule)?);
        }

        let placeholder = Regex::new(r"\{([^{}]+)\}")
            .map_err(|e| ParseError::new("placeholder", e))?;

        Ok(Self {
            container,
            items_path: config.items_path.clone(),
            rules,
            placeholder,
            title_source,
        })
    }

    fn compile(name: &str, field: Field, rule: &FieldRule) -> Result<CompiledRule, ParseError> {
        let selector = rule.selector.as_deref().map(parse_selector).transpose()?;
        let needs_attr = matches!(rule.extract, Extract::Attr | Extract::AncestorAttr);
        let attr = match (&rule.attr, needs_attr) {
            (Some(attr), _) => attr.to_ascii_lowercase(),
            (None, true) => {
                return Err(ParseError::new(name, "attr extraction needs an `attr` name"));
            }
            (None, false) => String::new(),
        };
        if rule.extract == Extract::AncestorAttr && selector.is_none() {
            return Err(ParseError::new(name, "ancestor_attr needs a selector"));
        }
        Ok(CompiledRule {
            field,
            selector,
            path: rule.path.clone(),
            extract: rule.extract,
            attr,
            default: rule.default.clone(),
        })
    }

    fn parse_markup(
        &self,
        payload: &Payload,
        jurisdiction: &JurisdictionConfig,
        issue_date: NaiveDate,
    ) -> Result<Vec<PublicationRecord>, ParseError> {
        let container = self.container.as_ref().ok_or_else(|| {
            ParseError::new(
                snippet(&payload.body),
                format!("{} payload but no container selector", payload.format),
            )
        })?;
        let document = load_markup(payload)?;
        let base = base_url(jurisdiction, payload);

        let items: Vec<ElementRef<'_>> = document.select(container).collect();
        let records = items
            .iter()
            .filter_map(|item| {
                let mut raw = RawRecord::default();
                for rule in &self.rules {
                    assign(&mut raw, rule.field, markup_value(item, rule), base);
                }
                build(jurisdiction, issue_date, raw)
            })
            .collect();
        self.require_titles(items.len(), records)
    }

    fn parse_json(
        &self,
        payload: &Payload,
        jurisdiction: &JurisdictionConfig,
        issue_date: NaiveDate,
    ) -> Result<Vec<PublicationRecord>, ParseError> {
        let items_path = self.items_path.as_deref().ok_or_else(|| {
            ParseError::new(snippet(&payload.body), "JSON payload but no items_path")
        })?;
        let root: Value = serde_json::from_str(&payload.body)
            .map_err(|e| ParseError::new(snippet(&payload.body), e))?;
        let items = lookup(&root, items_path)
            .ok_or_else(|| ParseError::new(items_path, "items_path not found"))?
            .as_array()
            .ok_or_else(|| ParseError::new(items_path, "items_path is not an array"))?;
        let base = base_url(jurisdiction, payload);

        let records = items
            .iter()
            .filter_map(|item| {
                let mut raw = RawRecord::default();
                for rule in &self.rules {
                    let value = self.json_value(item, rule);
                    assign(&mut raw, rule.field, value, base);
                }
                build(jurisdiction, issue_date, raw)
            })
            .collect();
        self.require_titles(items.len(), records)
    }

    /// Items matched but none produced a title: the source layout changed,
    /// which must not pass for an empty issue.
    fn require_titles(
        &self,
        matched: usize,
        records: Vec<PublicationRecord>,
    ) -> Result<Vec<PublicationRecord>, ParseError> {
        if matched > 0 && records.is_empty() {
            return Err(ParseError::new(
                self.title_source.as_str(),
                format!("{matched} items matched but none had a title"),
            ));
        }
        Ok(records)
    }

    /// Resolve a dotted path, or a template of `{dotted.path}` pieces.
    fn json_value(&self, item: &Value, rule: &CompiledRule) -> String {
        let value = match rule.path.as_deref() {
            None => String::new(),
            Some(path) if path.contains('{') => self
                .placeholder
                .replace_all(path, |caps: &regex::Captures<'_>| {
                    lookup(item, &caps[1]).map(scalar).unwrap_or_default()
                })
                .into_owned(),
            Some(path) => lookup(item, path).map(scalar).unwrap_or_default(),
        };
        or_default(value, rule)
    }
}

impl RecordParser for RuleParser {
    fn parse(
        &self,
        payload: &Payload,
        jurisdiction: &JurisdictionConfig,
        issue_date: NaiveDate,
    ) -> Result<Vec<PublicationRecord>, ParseError> {
        match payload.format {
            PayloadFormat::Json => self.parse_json(payload, jurisdiction, issue_date),
            PayloadFormat::Html | PayloadFormat::Xml => {
                self.parse_markup(payload, jurisdiction, issue_date)
            }
        }
    }
}

fn markup_value(item: &ElementRef<'_>, rule: &CompiledRule) -> String {
    let target = match &rule.selector {
        Some(sel) => item.select(sel).next(),
        None => Some(*item),
    };
    let value = match rule.extract {
        Extract::Text => target.map(|e| element_text(&e)),
        Extract::Attr => target.and_then(|e| e.value().attr(&rule.attr).map(str::to_string)),
        Extract::AncestorAttr => rule.selector.as_ref().and_then(|sel| {
            item.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|ancestor| sel.matches(ancestor))
                .and_then(|ancestor| ancestor.value().attr(&rule.attr).map(str::to_string))
        }),
    };
    or_default(value.unwrap_or_default(), rule)
}

fn or_default(value: String, rule: &CompiledRule) -> String {
    if value.trim().is_empty() {
        rule.default.clone()
    } else {
        value
    }
}

fn assign(raw: &mut RawRecord, field: Field, value: String, base: &str) {
    match field {
        Field::Title => raw.title = value,
        Field::Section => raw.section = value,
        Field::Department => raw.department = value,
        Field::Discriminator => raw.discriminator = value,
        Field::Url => raw.document_url = Some(resolve(base, value.trim())),
    }
}

/// Records without a title are dropped.
fn build(
    jurisdiction: &JurisdictionConfig,
    issue_date: NaiveDate,
    raw: RawRecord,
) -> Option<PublicationRecord> {
    let record = PublicationRecord::new(&jurisdiction.code, issue_date, raw);
    (!record.title.is_empty()).then_some(record)
}

fn base_url<'a>(jurisdiction: &'a JurisdictionConfig, payload: &'a Payload) -> &'a str {
    if jurisdiction.base_url.is_empty() {
        &payload.source_url
    } else {
        &jurisdiction.base_url
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, key| match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
