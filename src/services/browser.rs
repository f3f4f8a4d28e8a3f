// src/services/browser.rs

//! Headless browser retrieval for sources that build their content with
//! client-side scripts.
//!
//! A Chromium-compatible binary is driven in `--dump-dom` mode: it loads
//! the page, lets scripts run for the virtual time budget, and prints the
//! serialized DOM on stdout.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::process::Command;

use crate::error::FetchError;
use crate::models::PayloadFormat;
use crate::services::fetch::{FetchOutcome, Payload, SourceAdapter};
use crate::utils::template::render_endpoint;

pub struct BrowserAdapter {
    binary: String,
    endpoint_template: String,
    user_agent: String,
    settle_ms: u64,
    render_timeout: Duration,
}

impl BrowserAdapter {
    pub fn new(
        binary: &str,
        endpoint_template: &str,
        user_agent: &str,
        settle_ms: u64,
        render_timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.to_string(),
            endpoint_template: endpoint_template.to_string(),
            user_agent: user_agent.to_string(),
            settle_ms,
            render_timeout,
        }
    }

    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!("--user-agent={}", self.user_agent))
            .arg(format!("--virtual-time-budget={}", self.settle_ms))
            .arg("--dump-dom")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SourceAdapter for BrowserAdapter {
    fn method(&self) -> &'static str {
        "headless_browser"
    }

    async fn fetch(&self, date: NaiveDate) -> Result<FetchOutcome, FetchError> {
        let url = render_endpoint(&self.endpoint_template, date)?;
        log::debug!("Rendering {} with {}", url, self.binary);

        let output = match tokio::time::timeout(self.render_timeout, self.command(&url).output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(FetchError::permanent(format!(
                    "browser binary '{}' not found",
                    self.binary
                )));
            }
            Ok(Err(e)) => return Err(FetchError::unreachable(e)),
            Err(_) => return Err(FetchError::RenderTimeout(self.render_timeout.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().last().unwrap_or_default().chars().take(200).collect();
            return Err(FetchError::unreachable(format!(
                "browser exited with {} for {}: {}",
                output.status, url, tail
            )));
        }

        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        if body.trim().is_empty() {
            return Ok(FetchOutcome::NoContent);
        }

        Ok(FetchOutcome::Payload(Payload {
            body,
            format: PayloadFormat::Html,
            source_url: url,
        }))
    }
}
