// src/pipeline/validate.rs

use chrono::Local;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::services::{adapter_for, parser_for};
use crate::utils::http::create_async_client;
use crate::utils::log;
use crate::utils::template::render_endpoint;

/// Check global settings and build every jurisdiction's adapter and parser.
///
/// Nothing is fetched. All problems are logged before the first one is
/// returned, so a single pass shows everything that needs fixing.
pub fn run_validate(config: &Config) -> Result<()> {
    log::header("Validating configuration");

    config.validate_settings()?;
    log::sub_item(&format!("User agent: {}", config.fetch.user_agent));
    log::sub_item(&format!("Timeout: {}s", config.fetch.timeout_secs));
    log::sub_item(&format!("Max retries: {}", config.fetch.max_retries));
    log::sub_item(&format!("Max concurrent: {}", config.fetch.max_concurrent));
    log::sub_item(&format!("Storage: {}", config.storage.root.display()));

    let client = create_async_client(&config.fetch)?;
    let today = Local::now().date_naive();
    let mut problems = Vec::new();

    for j in &config.jurisdictions {
        let mut issues = Vec::new();
        if let Err(e) = j.validate() {
            issues.push(e.to_string());
        }
        if let Err(e) = render_endpoint(&j.endpoint_template, today) {
            issues.push(format!("endpoint: {e}"));
        }
        if let Err(e) = adapter_for(j, &config.fetch, &client) {
            issues.push(format!("fetch: {e}"));
        }
        if let Err(e) = parser_for(&j.parser) {
            issues.push(format!("parser: {e}"));
        }

        let state = if j.enabled { "" } else { " (disabled)" };
        if issues.is_empty() {
            log::sub_item(&format!("✓ {} [{}]{}", j.code, j.fetch_method_name(), state));
        } else {
            for issue in &issues {
                ::log::error!("✗ {}{}: {}", j.code, state, issue);
            }
            problems.extend(issues.into_iter().map(|i| format!("{}: {}", j.code, i)));
        }
    }

    log::summary(
        "Validation",
        &[
            ("Jurisdictions", config.jurisdictions.len().to_string()),
            ("Enabled", config.enabled_codes().len().to_string()),
            ("Problems", problems.len().to_string()),
        ],
    );

    match problems.first() {
        None => Ok(()),
        Some(first) => Err(AppError::validation(format!(
            "{} problem(s), first: {}",
            problems.len(),
            first
        ))),
    }
}
