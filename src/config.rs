// src/config.rs

//! Configuration loading utilities.
//!
//! The TOML file is the base; a few environment variables override it so a
//! scheduler can tune one invocation without editing the file.

use std::path::Path;

use crate::error::Result;
use crate::models::{Config, NotifierKind};

/// Load configuration from a TOML file and apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load(path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Override settings from the process environment.
///
/// - `BULLETIN_TIMEOUT_SECS`: HTTP request timeout
/// - `BULLETIN_MAX_CONCURRENT`: jurisdictions processed at once
/// - `BULLETIN_STORAGE_DIR`: record store root
/// - `BULLETIN_WEBHOOK_URL`: switches the notifier to the webhook
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(timeout) = var("BULLETIN_TIMEOUT_SECS") {
        match timeout.parse() {
            Ok(secs) => config.fetch.timeout_secs = secs,
            Err(_) => log::warn!("Ignoring invalid BULLETIN_TIMEOUT_SECS '{}'", timeout),
        }
    }

    if let Some(concurrent) = var("BULLETIN_MAX_CONCURRENT") {
        match concurrent.parse() {
            Ok(n) => config.fetch.max_concurrent = n,
            Err(_) => log::warn!("Ignoring invalid BULLETIN_MAX_CONCURRENT '{}'", concurrent),
        }
    }

    if let Some(dir) = var("BULLETIN_STORAGE_DIR").filter(|d| !d.trim().is_empty()) {
        config.storage.root = dir.into();
    }

    if let Some(url) = var("BULLETIN_WEBHOOK_URL").filter(|u| !u.trim().is_empty()) {
        config.notifier.kind = NotifierKind::Webhook;
        config.notifier.webhook_url = Some(url);
    }
}
