// src/services/fetch.rs

//! Source adapter abstraction, retry policy and adapter registry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use rand::Rng;
use reqwest::StatusCode;

use crate::error::{FetchError, Result};
use crate::models::{FetchConfig, FetchMethod, JurisdictionConfig, PayloadFormat};
use crate::services::{ApiAdapter, BrowserAdapter, HttpAdapter};
use crate::utils::http;

/// Raw content retrieved for one bulletin date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: String,
    pub format: PayloadFormat,
    /// Address the content was read from
    pub source_url: String,
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Payload(Payload),
    /// No bulletin published for that date (weekend, holiday)
    NoContent,
}

/// Per-jurisdiction retrieval strategy.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Configuration name of the strategy, for logs.
    fn method(&self) -> &'static str;

    /// Fetch raw content for `date` without interpreting it.
    async fn fetch(&self, date: NaiveDate) -> std::result::Result<FetchOutcome, FetchError>;
}

/// Resolve the adapter for a jurisdiction's `fetch.method`.
pub fn adapter_for(
    jurisdiction: &JurisdictionConfig,
    config: &FetchConfig,
    client: &reqwest::Client,
) -> Result<Box<dyn SourceAdapter>> {
    let headers = http::header_map(&jurisdiction.headers)?;
    let adapter: Box<dyn SourceAdapter> = match &jurisdiction.fetch {
        FetchMethod::DirectHttp { format, verify_tls } => {
            let client = if *verify_tls {
                client.clone()
            } else {
                http::create_insecure_client(config)?
            };
            Box::new(HttpAdapter::new(
                client,
                &jurisdiction.endpoint_template,
                headers,
                *format,
            ))
        }
        FetchMethod::HeadlessBrowser { settle_ms } => Box::new(BrowserAdapter::new(
            &config.browser_binary,
            &jurisdiction.endpoint_template,
            &config.user_agent,
            *settle_ms,
            Duration::from_secs(config.render_timeout_secs),
        )),
        FetchMethod::SpecializedApi {
            id_pattern,
            api_url,
            form,
        } => Box::new(ApiAdapter::new(
            client.clone(),
            &jurisdiction.endpoint_template,
            headers,
            id_pattern,
            api_url,
            form.clone(),
        )?),
    };
    Ok(adapter)
}

/// Map an HTTP status to "has content", "no bulletin" or a fetch error.
pub(crate) fn check_status(status: StatusCode, url: &str) -> std::result::Result<bool, FetchError> {
    match status.as_u16() {
        200..=299 => Ok(true),
        404 | 410 => Ok(false),
        429 => Err(FetchError::RateLimited(format!("{url} answered {status}"))),
        403 | 408 | 500..=599 => Err(FetchError::unreachable(format!("{url} answered {status}"))),
        _ => Err(FetchError::permanent(format!("{url} answered {status}"))),
    }
}

/// Bounded exponential backoff for transient fetch failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// Everything the orchestrator needs to know about one fetch stage.
#[derive(Debug)]
pub struct FetchReport {
    pub result: std::result::Result<FetchOutcome, FetchError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Fetch with retries for transient failures.
///
/// Future dates are rejected before any I/O. `NoContent` and permanent
/// errors return immediately.
pub async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    date: NaiveDate,
    policy: &RetryPolicy,
) -> FetchReport {
    let started = Instant::now();

    let today = Local::now().date_naive();
    if date > today {
        return FetchReport {
            result: Err(FetchError::permanent(format!(
                "{date} is in the future (today is {today})"
            ))),
            attempts: 0,
            elapsed: started.elapsed(),
        };
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = adapter.fetch(date).await;

        match result {
            Err(err) if err.is_transient() && attempt <= policy.max_retries => {
                let delay = policy.delay_with_jitter(attempt);
                log::warn!(
                    "{} fetch attempt {}/{} failed: {}. Retrying in {:?}",
                    adapter.method(),
                    attempt,
                    policy.max_retries + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            result => {
                return FetchReport {
                    result,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Adapter that replays a scripted sequence of results.
    struct ScriptedAdapter {
        script: Mutex<Vec<std::result::Result<FetchOutcome, FetchError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedAdapter {
        fn new(mut script: Vec<std::result::Result<FetchOutcome, FetchError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn method(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, _date: NaiveDate) -> std::result::Result<FetchOutcome, FetchError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(FetchOutcome::NoContent))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(0),
        }
    }

    fn payload() -> FetchOutcome {
        FetchOutcome::Payload(Payload {
            body: "<html></html>".into(),
            format: PayloadFormat::Html,
            source_url: "https://example.com".into(),
        })
    }

    fn past_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
    }

    #[test]
    fn default_policy_is_three_retries_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let adapter = ScriptedAdapter::new(vec![
            Err(FetchError::unreachable("down")),
            Err(FetchError::RateLimited("slow down".into())),
            Err(FetchError::unreachable("still down")),
            Ok(payload()),
        ]);
        let report = fetch_with_retry(&adapter, past_date(), &fast_policy()).await;
        assert_eq!(report.result, Ok(payload()));
        assert_eq!(report.attempts, 4);
        // 20ms + 40ms + 80ms of backoff
        assert!(report.elapsed >= Duration::from_millis(140));
    }

    #[tokio::test]
    async fn transient_failures_surface_after_last_attempt() {
        let adapter = ScriptedAdapter::new(vec![
            Err(FetchError::unreachable("1")),
            Err(FetchError::unreachable("2")),
            Err(FetchError::unreachable("3")),
            Err(FetchError::unreachable("4")),
            Ok(payload()),
        ]);
        let report = fetch_with_retry(&adapter, past_date(), &fast_policy()).await;
        assert_eq!(report.result, Err(FetchError::unreachable("4")));
        assert_eq!(adapter.calls(), 4);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let adapter = ScriptedAdapter::new(vec![Err(FetchError::permanent("bad"))]);
        let report = fetch_with_retry(&adapter, past_date(), &fast_policy()).await;
        assert!(matches!(report.result, Err(FetchError::Permanent(_))));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn no_content_is_not_retried() {
        let adapter = ScriptedAdapter::new(vec![Ok(FetchOutcome::NoContent)]);
        let report = fetch_with_retry(&adapter, past_date(), &fast_policy()).await;
        assert_eq!(report.result, Ok(FetchOutcome::NoContent));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn future_dates_are_rejected_without_io() {
        let adapter = ScriptedAdapter::new(vec![Ok(payload())]);
        let tomorrow = Local::now().date_naive() + chrono::Duration::days(2);
        let report = fetch_with_retry(&adapter, tomorrow, &fast_policy()).await;
        assert!(matches!(report.result, Err(FetchError::Permanent(_))));
        assert_eq!(adapter.calls(), 0);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(check_status(StatusCode::OK, "u"), Ok(true));
        assert_eq!(check_status(StatusCode::NOT_FOUND, "u"), Ok(false));
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS, "u"),
            Err(FetchError::RateLimited(_))
        ));
        assert!(matches!(
            check_status(StatusCode::SERVICE_UNAVAILABLE, "u"),
            Err(FetchError::Unreachable(_))
        ));
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN, "u"),
            Err(FetchError::Unreachable(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_REQUEST, "u"),
            Err(FetchError::Permanent(_))
        ));
    }
}
