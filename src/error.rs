// src/error.rs

//! Unified error handling for the bulletin monitor.
//!
//! `AppError` covers configuration and plumbing failures. The pipeline
//! stages carry their own narrower types (`FetchError`, `ParseError`,
//! `StoreError`, `NotifyError`) so the orchestrator can classify a run
//! outcome without string matching.

use std::fmt;

use thiserror::Error;

/// Result type alias for application operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Structured failure of a Source Adapter.
///
/// "No bulletin for that date" is deliberately absent: adapters report it
/// as `FetchOutcome::NoContent`, a successful empty fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection refused, DNS failure, timeout or a 5xx answer.
    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// The source asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The headless browser did not finish rendering in time.
    #[error("render timed out after {0}s")]
    RenderTimeout(u64),

    /// Malformed endpoint, unsupported status, future date, missing browser.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Whether the adapter's retry loop should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::RateLimited(_))
    }

    pub fn permanent(message: impl fmt::Display) -> Self {
        Self::Permanent(message.to_string())
    }

    pub fn unreachable(message: impl fmt::Display) -> Self {
        Self::Unreachable(message.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::permanent(err);
        }
        // Timeouts, connection failures and body read errors are all
        // worth another attempt.
        Self::unreachable(err)
    }
}

/// Content was retrieved but could not be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at '{fragment}': {message}")]
pub struct ParseError {
    /// The selector, path or snippet that could not be handled
    pub fragment: String,
    pub message: String,
}

impl ParseError {
    pub fn new(fragment: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            fragment: fragment.into(),
            message: message.to_string(),
        }
    }
}

/// Persistence failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt store data in {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Notification delivery failure. Never fatal to the data pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);
