// src/utils/http.rs

//! HTTP client utilities.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::FetchConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &FetchConfig) -> Result<reqwest::Client> {
    build_client(config, true)
}

/// Create a client that accepts invalid certificates, for sources that
/// are configured with `verify_tls = false`.
pub fn create_insecure_client(config: &FetchConfig) -> Result<reqwest::Client> {
    build_client(config, false)
}

fn build_client(config: &FetchConfig, verify_tls: bool) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .danger_accept_invalid_certs(!verify_tls)
        .build()?;
    Ok(client)
}

/// Convert configured header pairs into a `HeaderMap`.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::config(format!("invalid header value for '{name}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
