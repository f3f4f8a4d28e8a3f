//! Service layer for the bulletin monitor.
//!
//! This module contains:
//! - Source adapters (`HttpAdapter`, `BrowserAdapter`, `ApiAdapter`) and
//!   the retrying fetch wrapper
//! - Parsers (`RuleParser`, `AnchorScanParser`)
//! - Notifiers (`LogNotifier`, `WebhookNotifier`)

mod anchors;
mod api;
mod browser;
pub mod fetch;
mod http;
pub mod notify;
pub mod parse;
mod rules;

pub use anchors::AnchorScanParser;
pub use api::ApiAdapter;
pub use browser::BrowserAdapter;
pub use fetch::{
    FetchOutcome, FetchReport, Payload, RetryPolicy, SourceAdapter, adapter_for,
    fetch_with_retry,
};
pub use http::HttpAdapter;
pub use notify::{
    LogNotifier, Notification, Notifier, WebhookNotifier, filter_by_keywords,
    notifier_from_config,
};
pub use parse::{RecordParser, parser_for};
pub use rules::RuleParser;
