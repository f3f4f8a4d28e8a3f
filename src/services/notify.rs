// src/services/notify.rs

//! Notification building and delivery.
//!
//! The pipeline never fails because of a notifier: delivery errors are
//! returned to the orchestrator, which records them as a partial run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, NotifyError, Result};
use crate::models::{NotifierConfig, NotifierKind, PublicationRecord};
use crate::pipeline::DiffResult;

/// Summary of one run, ready to be delivered.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub jurisdiction: String,
    pub display_name: String,
    pub issue_date: chrono::NaiveDate,
    pub has_changes: bool,
    pub added_count: usize,
    pub removed_count: usize,
    /// Active keyword filter, empty when everything is reported
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Build the notification for an (already filtered) diff.
    pub fn from_diff(
        display_name: &str,
        diff: &DiffResult,
        keywords: &[String],
        max_listed: usize,
    ) -> Self {
        let date = diff.issue_date.format("%d/%m/%Y");
        let subject = if diff.has_changes() {
            format!(
                "Changes in {display_name} - {date}: {} new, {} removed",
                diff.added.len(),
                diff.removed.len()
            )
        } else {
            format!("No changes in {display_name} - {date}")
        };

        Self {
            jurisdiction: diff.jurisdiction.clone(),
            display_name: display_name.to_string(),
            issue_date: diff.issue_date,
            has_changes: diff.has_changes(),
            added_count: diff.added.len(),
            removed_count: diff.removed.len(),
            keywords: keywords.to_vec(),
            subject,
            body: render_body(display_name, diff, keywords, max_listed),
        }
    }
}

fn render_body(
    display_name: &str,
    diff: &DiffResult,
    keywords: &[String],
    max_listed: usize,
) -> String {
    let mut lines = vec![
        format!("Monitor {display_name} ({})", diff.jurisdiction),
        format!("Issue date: {}", diff.issue_date.format("%d/%m/%Y")),
    ];
    if !keywords.is_empty() {
        lines.push(format!("Keyword filter: {}", keywords.join(", ")));
    }
    lines.push(String::new());

    if !diff.has_changes() {
        lines.push(format!(
            "No new publications detected in {display_name} for this issue."
        ));
        return lines.join("\n") + "\n";
    }

    if !diff.added.is_empty() {
        lines.push(format!(
            "{} new publication(s) since the last check:",
            diff.added.len()
        ));
        lines.extend(diff.added.iter().take(max_listed).map(|record| {
            record.format("- {title}\n  Section: {section} | Department: {department}\n  {url}")
        }));
        if diff.added.len() > max_listed {
            lines.push(format!("... and {} more", diff.added.len() - max_listed));
        }
    }

    if !diff.removed.is_empty() {
        if !diff.added.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!(
            "{} publication(s) no longer listed since {}:",
            diff.removed.len(),
            diff.baseline_date
                .map(|d| d.format("%d/%m/%Y").to_string())
                .unwrap_or_else(|| "the previous issue".to_string())
        ));
        lines.extend(
            diff.removed
                .iter()
                .take(max_listed)
                .map(|record| format!("- {}", record.title)),
        );
        if diff.removed.len() > max_listed {
            lines.push(format!("... and {} more", diff.removed.len() - max_listed));
        }
    }
    lines.join("\n") + "\n"
}

/// Restrict a diff to records mentioning one of `keywords`.
///
/// Matching is case-insensitive over title, section and department. No
/// keywords means no filtering.
pub fn filter_by_keywords(diff: &DiffResult, keywords: &[String]) -> DiffResult {
    let needles: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if needles.is_empty() {
        return diff.clone();
    }

    let matches = |record: &&PublicationRecord| {
        let haystack =
            format!("{} {} {}", record.title, record.section, record.department).to_lowercase();
        needles.iter().any(|n| haystack.contains(n.as_str()))
    };

    DiffResult {
        added: diff.added.iter().filter(matches).cloned().collect(),
        removed: diff.removed.iter().filter(matches).cloned().collect(),
        ..diff.clone()
    }
}

/// Delivery channel for run summaries.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), NotifyError> {
        log::info!("[NOTIFY] {}", notification.subject);
        for line in notification.body.lines() {
            log::info!("    {}", line);
        }
        Ok(())
    }
}

/// POSTs notifications as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError(format!("webhook answered {status}")));
        }
        log::debug!("Webhook accepted notification for {}", notification.jurisdiction);
        Ok(())
    }
}

/// Build the configured notifier.
pub fn notifier_from_config(
    config: &NotifierConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn Notifier>> {
    match config.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Webhook => {
            let url = config.webhook_url.as_deref().ok_or_else(|| {
                AppError::config("notifier.webhook_url is required for the webhook notifier")
            })?;
            url::Url::parse(url)?;
            Ok(Arc::new(WebhookNotifier::new(client.clone(), url)))
        }
    }
}
