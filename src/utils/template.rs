//! Endpoint URL templates with date placeholders.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::error::FetchError;

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}"));

/// Render an endpoint template for a bulletin date.
///
/// Placeholders: `{date_ymd}`, `{date}`, `{date_dmy}`, `{date_dmy_encoded}`,
/// `{date_dmy_dot}`, `{date_iso}`, `{day}`, `{month}`, `{year}`.
/// Anything else in braces is a permanent error, since retrying a broken
/// template cannot help.
pub fn render_endpoint(template: &str, date: NaiveDate) -> Result<String, FetchError> {
    let placeholder = PLACEHOLDER.as_ref().map_err(FetchError::permanent)?;

    let mut unknown = None;
    let rendered = placeholder.replace_all(template, |caps: &regex::Captures<'_>| {
        match value_for(&caps[1], date) {
            Some(v) => v,
            None => {
                unknown.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });

    match unknown {
        Some(name) => Err(FetchError::permanent(format!(
            "endpoint template has unknown placeholder '{{{name}}}'"
        ))),
        None => Ok(rendered.into_owned()),
    }
}

fn value_for(name: &str, date: NaiveDate) -> Option<String> {
    let value = match name {
        "date_ymd" | "date" => date.format("%Y%m%d").to_string(),
        "date_dmy" => date.format("%d/%m/%Y").to_string(),
        "date_dmy_encoded" => date.format("%d/%m/%Y").to_string().replace('/', "%2F"),
        "date_dmy_dot" => date.format("%d.%m.%Y").to_string(),
        "date_iso" => date.format("%Y-%m-%d").to_string(),
        "day" => date.day().to_string(),
        "month" => date.month().to_string(),
        "year" => date.year().to_string(),
        _ => return None,
    };
    Some(value)
}
