//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::JurisdictionConfig;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP, browser and retry settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Notification settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Bulletin sources
    #[serde(default)]
    pub jurisdictions: Vec<JurisdictionConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Look up a jurisdiction by code (case-insensitive).
    pub fn jurisdiction(&self, code: &str) -> Option<&JurisdictionConfig> {
        self.jurisdictions
            .iter()
            .find(|j| j.code.eq_ignore_ascii_case(code))
    }

    /// Codes of all enabled jurisdictions, in configuration order.
    pub fn enabled_codes(&self) -> Vec<String> {
        self.jurisdictions
            .iter()
            .filter(|j| j.enabled)
            .map(|j| j.code.clone())
            .collect()
    }

    /// Validate global settings and every jurisdiction.
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;
        self.jurisdictions.iter().try_for_each(JurisdictionConfig::validate)
    }

    /// Checks that concern the whole run rather than one jurisdiction.
    ///
    /// Per-jurisdiction problems are left to [`JurisdictionConfig::validate`],
    /// which the orchestrator runs for each jurisdiction separately.
    pub fn validate_settings(&self) -> Result<()> {
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.max_concurrent == 0 {
            return Err(AppError::validation("fetch.max_concurrent must be > 0"));
        }
        if self.storage.timeout_secs == 0 {
            return Err(AppError::validation("storage.timeout_secs must be > 0"));
        }
        if self.notifier.kind == NotifierKind::Webhook && self.notifier.webhook_url.is_none() {
            return Err(AppError::validation(
                "notifier.webhook_url is required for the webhook notifier",
            ));
        }
        if self.jurisdictions.is_empty() {
            return Err(AppError::validation("No jurisdictions defined"));
        }

        let mut seen = HashSet::new();
        for j in &self.jurisdictions {
            if !seen.insert(j.code.trim().to_lowercase()) {
                return Err(AppError::validation(format!(
                    "duplicate jurisdiction code '{}'",
                    j.code
                )));
            }
        }
        Ok(())
    }
}

/// HTTP client, browser and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt, for transient failures only
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the second attempt; doubles afterwards
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,

    /// Upper bound of the random delay added to each backoff
    #[serde(default = "defaults::jitter")]
    pub jitter_ms: u64,

    /// Chromium-compatible binary for the headless browser adapter
    #[serde(default = "defaults::browser_binary")]
    pub browser_binary: String,

    #[serde(default = "defaults::render_timeout")]
    pub render_timeout_secs: u64,

    /// Maximum jurisdictions processed concurrently
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_retries: defaults::max_retries(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
            jitter_ms: defaults::jitter(),
            browser_binary: defaults::browser_binary(),
            render_timeout_secs: defaults::render_timeout(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the record store
    #[serde(default = "defaults::storage_root")]
    pub root: PathBuf,

    /// Timeout for a single store operation
    #[serde(default = "defaults::store_timeout")]
    pub timeout_secs: u64,

    /// Where audit entries go when the store itself cannot take them
    #[serde(default = "defaults::fallback_audit_log")]
    pub fallback_audit_log: PathBuf,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: defaults::storage_root(),
            timeout_secs: defaults::store_timeout(),
            fallback_audit_log: defaults::fallback_audit_log(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Write the summary to the log
    #[default]
    Log,
    /// POST the summary as JSON
    Webhook,
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,

    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Send a "no changes" notice when nothing was added or removed
    #[serde(default = "defaults::notify_unchanged")]
    pub notify_unchanged: bool,

    /// Maximum records listed in one notification body
    #[serde(default = "defaults::max_listed")]
    pub max_listed: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::default(),
            webhook_url: None,
            notify_unchanged: defaults::notify_unchanged(),
            max_listed: defaults::max_listed(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; bulletin-monitor/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn base_delay() -> u64 {
        2000
    }
    pub fn max_delay() -> u64 {
        30_000
    }
    pub fn jitter() -> u64 {
        500
    }
    pub fn browser_binary() -> String {
        "chromium".into()
    }
    pub fn render_timeout() -> u64 {
        60
    }
    pub fn max_concurrent() -> usize {
        4
    }

    // Storage defaults
    pub fn storage_root() -> PathBuf {
        PathBuf::from("storage/data")
    }
    pub fn store_timeout() -> u64 {
        10
    }
    pub fn fallback_audit_log() -> PathBuf {
        PathBuf::from("storage/audit-fallback.jsonl")
    }

    // Notifier defaults
    pub fn notify_unchanged() -> bool {
        true
    }
    pub fn max_listed() -> usize {
        50
    }
}
