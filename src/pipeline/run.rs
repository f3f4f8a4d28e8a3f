// src/pipeline/run.rs

//! Per-jurisdiction pipeline orchestration.
//!
//! One run walks `Fetching → Parsing → Diffing → Persisting → Notifying →
//! Done`, or jumps to `Failed`. Exactly one audit entry is written when the
//! run reaches a terminal stage.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};

use crate::error::{Result, StoreError};
use crate::models::{
    AuditDraft, AuditEntry, ComparisonMode, Config, JurisdictionConfig, RunStage, RunStatus,
};
use crate::pipeline::diff::{DiffEngine, DiffResult};
use crate::services::{
    FetchOutcome, Notification, Notifier, RetryPolicy, adapter_for, fetch_with_retry,
    filter_by_keywords, parser_for,
};
use crate::storage::{FallbackAuditLog, RecordStore, StoreResult};
use crate::utils::http::create_async_client;

/// Outcome of one jurisdiction run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub entry: AuditEntry,
    /// Unfiltered diff, when the run got past diffing
    pub diff: Option<DiffResult>,
    /// Last stage entered before the terminal one
    pub stage_reached: RunStage,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.entry.status
    }
}

/// In-flight state of one run.
struct RunState {
    code: String,
    stage: RunStage,
    draft: AuditDraft,
    notify_error: Option<String>,
}

impl RunState {
    fn new(code: &str, date: NaiveDate) -> Self {
        Self {
            code: code.to_string(),
            stage: RunStage::Fetching,
            draft: AuditDraft::start(code, date),
            notify_error: None,
        }
    }

    fn advance(&mut self, next: RunStage) {
        log::debug!("[{}] {} -> {}", self.code, self.stage, next);
        self.stage = next;
    }
}

/// Runs the pipeline for configured jurisdictions.
pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    client: reqwest::Client,
    fallback: FallbackAuditLog,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let client = create_async_client(&config.fetch)?;
        Ok(Self {
            fallback: FallbackAuditLog::new(&config.storage.fallback_audit_log),
            retry: RetryPolicy::from_config(&config.fetch),
            config: Arc::new(config),
            store,
            notifier,
            client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run several jurisdictions concurrently, bounded by
    /// `fetch.max_concurrent`. Reports come back in the order of `codes`.
    ///
    /// Codes are matched case-insensitively; repeats after the first are
    /// dropped so one partition never has two writers in the same batch.
    pub async fn run_many(&self, codes: &[String], date: NaiveDate) -> Vec<RunReport> {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = codes
            .iter()
            .filter(|code| seen.insert(code.to_ascii_lowercase()))
            .collect();
        if unique.len() != codes.len() {
            log::warn!(
                "Ignoring {} repeated jurisdiction code(s)",
                codes.len() - unique.len()
            );
        }

        let concurrency = self.config.fetch.max_concurrent.max(1);
        let mut reports: Vec<(usize, RunReport)> = stream::iter(unique.into_iter().enumerate())
            .map(|(i, code)| async move { (i, self.run_jurisdiction(code, date).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        reports.sort_by_key(|(i, _)| *i);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Run the full pipeline for one jurisdiction and date.
    ///
    /// Never fails: every outcome, including an unknown code, ends up in
    /// the returned report and in exactly one audit entry.
    pub async fn run_jurisdiction(&self, code: &str, date: NaiveDate) -> RunReport {
        let mut state = RunState::new(code, date);

        let result = match self.config.jurisdiction(code) {
            None => Err(format!("unknown jurisdiction '{code}'")),
            Some(j) if !j.enabled => Err(format!("jurisdiction '{}' is disabled", j.code)),
            Some(j) => {
                state.code = j.code.clone();
                state.draft.jurisdiction = j.code.clone();
                self.execute(j, date, &mut state).await
            }
        };

        let stage_reached = state.stage;
        let (status, detail, diff) = match result {
            Ok(diff) => match state.notify_error.take() {
                None => (RunStatus::Success, None, Some(diff)),
                Some(err) => (RunStatus::Partial, Some(err), Some(diff)),
            },
            Err(detail) => (RunStatus::Failed, Some(detail), None),
        };
        state.advance(if status == RunStatus::Failed {
            RunStage::Failed
        } else {
            RunStage::Done
        });

        let entry = state.draft.finish(status, detail);
        self.write_audit(&entry).await;
        log_outcome(&entry, stage_reached);

        RunReport {
            entry,
            diff,
            stage_reached,
        }
    }

    async fn execute(
        &self,
        jurisdiction: &JurisdictionConfig,
        date: NaiveDate,
        state: &mut RunState,
    ) -> std::result::Result<DiffResult, String> {
        let code = jurisdiction.code.as_str();

        // Check settings and resolve both strategies before any I/O.
        jurisdiction
            .validate()
            .map_err(|e| format!("configuration: {e}"))?;
        let adapter = adapter_for(jurisdiction, &self.config.fetch, &self.client)
            .map_err(|e| format!("configuration: {e}"))?;
        let parser = parser_for(&jurisdiction.parser).map_err(|e| format!("configuration: {e}"))?;

        let report = fetch_with_retry(adapter.as_ref(), date, &self.retry).await;
        state.draft.fetch_attempts = report.attempts;
        log::debug!(
            "[{}] {} fetch took {:?} over {} attempt(s)",
            code,
            adapter.method(),
            report.elapsed,
            report.attempts
        );

        let records = match report.result.map_err(|e| e.to_string())? {
            FetchOutcome::NoContent => {
                log::info!("[{}] No bulletin published for {}", code, date);
                Vec::new()
            }
            FetchOutcome::Payload(payload) => {
                state.advance(RunStage::Parsing);
                parser
                    .parse(&payload, jurisdiction, date)
                    .map_err(|e| e.to_string())?
            }
        };

        state.advance(RunStage::Diffing);
        let persisted = self
            .store_call("fetch_records", self.store.fetch_records(code, date))
            .await?;
        let previous = match jurisdiction.comparison {
            ComparisonMode::AppendOnly => None,
            ComparisonMode::Replace => self.previous_issue(code, date).await?,
        };
        let outcome = DiffEngine::new(jurisdiction.comparison).compute(
            code,
            date,
            records,
            &persisted,
            previous.as_deref(),
        );
        let mut diff = outcome.result;
        state.draft.records_fetched = diff.total_fetched;
        state.draft.records_removed = diff.removed.len();

        state.advance(RunStage::Persisting);
        let inserted = self
            .store_call(
                "insert_records",
                self.store.insert_records(code, &outcome.to_persist),
            )
            .await?;
        if inserted.len() != outcome.to_persist.len() {
            log::warn!(
                "[{}] Store kept {} of {} new records, the rest were already there",
                code,
                inserted.len(),
                outcome.to_persist.len()
            );
            // The store is authoritative: only what it kept counts as added.
            let kept: HashSet<&str> = inserted.iter().map(String::as_str).collect();
            diff.added.retain(|r| kept.contains(r.content_hash.as_str()));
        }
        state.draft.records_added = diff.added.len();

        state.advance(RunStage::Notifying);
        if let Err(e) = self.notify(jurisdiction, &diff).await {
            state.notify_error = Some(e);
        }

        Ok(diff)
    }

    /// Records of the last published issue before `date`.
    async fn previous_issue(
        &self,
        code: &str,
        date: NaiveDate,
    ) -> std::result::Result<Option<Vec<crate::models::PublicationRecord>>, String> {
        let Some(previous_date) = self
            .store_call("previous_issue_date", self.store.previous_issue_date(code, date))
            .await?
        else {
            return Ok(None);
        };
        log::debug!("[{}] Comparing against issue of {}", code, previous_date);
        let records = self
            .store_call("fetch_records", self.store.fetch_records(code, previous_date))
            .await?;
        Ok(Some(records))
    }

    async fn notify(
        &self,
        jurisdiction: &JurisdictionConfig,
        diff: &DiffResult,
    ) -> std::result::Result<(), String> {
        let settings = &self.config.notifier;
        let filtered = filter_by_keywords(diff, &jurisdiction.keywords);
        if !filtered.has_changes() && !settings.notify_unchanged {
            log::debug!("[{}] Nothing to report, notification skipped", jurisdiction.code);
            return Ok(());
        }

        let notification = Notification::from_diff(
            &jurisdiction.display_name,
            &filtered,
            &jurisdiction.keywords,
            settings.max_listed,
        );
        self.notifier
            .notify(&notification)
            .await
            .map_err(|e| e.to_string())
    }

    /// Bound a store operation by the configured timeout.
    async fn store_call<T>(
        &self,
        operation: &str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> std::result::Result<T, String> {
        let timeout = self.config.storage.timeout();
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{operation} timed out after {}s",
                timeout.as_secs()
            ))),
        };
        result.map_err(|e| e.to_string())
    }

    async fn write_audit(&self, entry: &AuditEntry) {
        let timeout = self.config.storage.timeout();
        let reason = match tokio::time::timeout(timeout, self.store.append_audit_entry(entry)).await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("append_audit_entry timed out after {}s", timeout.as_secs()),
        };
        log::error!("[{}] Audit write failed: {}", entry.jurisdiction, reason);
        self.fallback.record(entry).await;
    }
}

fn log_outcome(entry: &AuditEntry, stage: RunStage) {
    let summary = format!(
        "[{}] {} {}: fetched {}, added {}, removed {}",
        entry.jurisdiction,
        entry.issue_date,
        entry.status,
        entry.records_fetched,
        entry.records_added,
        entry.records_removed
    );
    match entry.status {
        RunStatus::Success => log::info!("{}", summary),
        RunStatus::Partial => log::warn!(
            "{} ({})",
            summary,
            entry.error_detail.as_deref().unwrap_or_default()
        ),
        RunStatus::Failed => log::error!(
            "{} at {} ({})",
            summary,
            stage,
            entry.error_detail.as_deref().unwrap_or_default()
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::NotifyError;
    use crate::models::{FetchMethod, ParserConfig, PayloadFormat, PublicationRecord};
    use crate::storage::LocalStorage;

    /// Notifier that records what it was asked to send.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, n: &Notification) -> std::result::Result<(), NotifyError> {
            self.sent.lock().unwrap().push(n.clone());
            if self.fail {
                Err(NotifyError("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn config(tmp: &TempDir, enabled: bool) -> Config {
        let mut config: Config = toml::from_str(&format!(
            r#"
            [[jurisdictions]]
            code = "es"
            display_name = "BOE"
            endpoint_template = "http://127.0.0.1:9/{{date}}"
            enabled = {enabled}
            [jurisdictions.fetch]
            method = "direct_http"
            [jurisdictions.parser]
            kind = "anchor_scan"
            href_contains = ["/boe/"]
            "#
        ))
        .unwrap();
        config.storage.root = tmp.path().join("data");
        config.storage.fallback_audit_log = tmp.path().join("fallback.jsonl");
        config.fetch.max_retries = 0;
        config
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    /// Config whose `es` endpoint is a mock server listing two laws.
    async fn served(tmp: &TempDir) -> (Config, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<h2>I</h2><a href="/boe/1.pdf">Ley 1</a><a href="/boe/2.pdf">Ley 2</a>"#,
            ))
            .mount(&server)
            .await;
        let mut config = config(tmp, true);
        config.jurisdictions[0].endpoint_template = format!("{}/{{date}}", server.uri());
        (config, server)
    }

    /// Store whose reads never see earlier writes, like a lagging replica.
    struct StaleReads(LocalStorage);

    /// Store whose reads hang past any sensible timeout.
    struct SlowReads(LocalStorage);

    #[async_trait]
    impl RecordStore for StaleReads {
        async fn insert_records(
            &self,
            jurisdiction: &str,
            records: &[PublicationRecord],
        ) -> StoreResult<Vec<String>> {
            self.0.insert_records(jurisdiction, records).await
        }
        async fn fetch_records(&self, _: &str, _: NaiveDate) -> StoreResult<Vec<PublicationRecord>> {
            Ok(Vec::new())
        }
        async fn previous_issue_date(&self, _: &str, _: NaiveDate) -> StoreResult<Option<NaiveDate>> {
            Ok(None)
        }
        async fn append_audit_entry(&self, entry: &AuditEntry) -> StoreResult<()> {
            self.0.append_audit_entry(entry).await
        }
        async fn load_audit(&self, jurisdiction: &str) -> StoreResult<Vec<AuditEntry>> {
            self.0.load_audit(jurisdiction).await
        }
    }

    #[async_trait]
    impl RecordStore for SlowReads {
        async fn insert_records(
            &self,
            jurisdiction: &str,
            records: &[PublicationRecord],
        ) -> StoreResult<Vec<String>> {
            self.0.insert_records(jurisdiction, records).await
        }
        async fn fetch_records(
            &self,
            code: &str,
            date: NaiveDate,
        ) -> StoreResult<Vec<PublicationRecord>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.fetch_records(code, date).await
        }
        async fn previous_issue_date(
            &self,
            code: &str,
            before: NaiveDate,
        ) -> StoreResult<Option<NaiveDate>> {
            self.0.previous_issue_date(code, before).await
        }
        async fn append_audit_entry(&self, entry: &AuditEntry) -> StoreResult<()> {
            self.0.append_audit_entry(entry).await
        }
        async fn load_audit(&self, jurisdiction: &str) -> StoreResult<Vec<AuditEntry>> {
            self.0.load_audit(jurisdiction).await
        }
    }

    fn orchestrator(config: Config, notifier: Arc<RecordingNotifier>) -> (Orchestrator, LocalStorage) {
        let store = LocalStorage::new(&config.storage.root);
        let orchestrator =
            Orchestrator::new(config, Arc::new(store.clone()), notifier).unwrap();
        (orchestrator, store)
    }

    #[tokio::test]
    async fn unknown_code_is_a_failed_entry() {
        let tmp = TempDir::new().unwrap();
        let (orch, store) = orchestrator(config(&tmp, true), Arc::default());

        let report = orch.run_jurisdiction("zz", date()).await;
        assert_eq!(report.status(), RunStatus::Failed);
        assert!(report.entry.error_detail.unwrap().contains("unknown jurisdiction"));
        assert_eq!(store.load_audit("zz").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_jurisdiction_is_a_failed_entry() {
        let tmp = TempDir::new().unwrap();
        let (orch, _) = orchestrator(config(&tmp, false), Arc::default());
        let report = orch.run_jurisdiction("ES", date()).await;
        assert_eq!(report.status(), RunStatus::Failed);
        assert!(report.entry.error_detail.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn unreachable_source_fails_in_fetching() {
        let tmp = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let (orch, store) = orchestrator(config(&tmp, true), Arc::clone(&notifier));

        let report = orch.run_jurisdiction("es", date()).await;
        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.stage_reached, RunStage::Fetching);
        assert_eq!(report.entry.fetch_attempts, 1);
        assert!(report.diff.is_none());
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert_eq!(store.load_audit("es").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broken_parser_config_fails_before_fetching() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp, true);
        config.jurisdictions[0].parser = ParserConfig::AnchorScan {
            href_contains: vec!["/boe/".into()],
            heading_selector: "[[h2".into(),
            department_selector: None,
        };
        config.jurisdictions[0].fetch = FetchMethod::DirectHttp {
            format: PayloadFormat::Html,
            verify_tls: true,
        };
        let (orch, _) = orchestrator(config, Arc::default());

        let report = orch.run_jurisdiction("es", date()).await;
        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.entry.fetch_attempts, 0);
        assert!(report.entry.error_detail.unwrap().starts_with("configuration"));
    }

    #[tokio::test]
    async fn audit_falls_back_when_store_rejects_it() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let mut config = config(&tmp, true);
        config.storage.root = blocker;
        let fallback = config.storage.fallback_audit_log.clone();
        let (orch, _) = orchestrator(config, Arc::default());

        let report = orch.run_jurisdiction("zz", date()).await;
        assert_eq!(report.status(), RunStatus::Failed);
        let text = std::fs::read_to_string(fallback).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test]
    async fn notification_failure_is_partial_and_data_is_kept() {
        let tmp = TempDir::new().unwrap();
        let (config, _server) = served(&tmp).await;
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });
        let (orch, store) = orchestrator(config, Arc::clone(&notifier));

        let report = orch.run_jurisdiction("es", date()).await;
        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(report.stage_reached, RunStage::Notifying);
        assert_eq!(report.entry.records_added, 2);
        assert!(report.entry.error_detail.unwrap().contains("smtp down"));
        assert_eq!(store.fetch_records("es", date()).await.unwrap().len(), 2);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_many_keeps_input_order() {
        let tmp = TempDir::new().unwrap();
        let (orch, _) = orchestrator(config(&tmp, true), Arc::default());
        let codes = vec!["b".to_string(), "a".to_string(), "es".to_string()];

        let reports = orch.run_many(&codes, date()).await;
        let order: Vec<_> = reports.iter().map(|r| r.entry.jurisdiction.as_str()).collect();
        assert_eq!(order, ["b", "a", "es"]);
        assert!(reports.iter().all(|r| r.status() == RunStatus::Failed));
    }

    #[tokio::test]
    async fn invalid_jurisdiction_does_not_block_the_others() {
        let tmp = TempDir::new().unwrap();
        let (mut config, _server) = served(&tmp).await;
        let mut broken = config.jurisdictions[0].clone();
        broken.code = "fr".into();
        broken.endpoint_template = String::new();
        config.jurisdictions.push(broken);
        let (orch, store) = orchestrator(config, Arc::default());

        let codes = vec!["es".to_string(), "fr".to_string()];
        let reports = orch.run_many(&codes, date()).await;
        assert_eq!(reports[0].status(), RunStatus::Success);
        assert_eq!(reports[0].entry.records_added, 2);
        assert_eq!(reports[1].status(), RunStatus::Failed);
        assert_eq!(reports[1].entry.fetch_attempts, 0);
        assert!(reports[1].entry.error_detail.as_deref().unwrap().contains("endpoint_template"));
        assert_eq!(store.load_audit("fr").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_codes_run_once() {
        let tmp = TempDir::new().unwrap();
        let (config, server) = served(&tmp).await;
        let (orch, store) = orchestrator(config, Arc::default());

        let codes = vec!["es".to_string(), "ES".to_string(), "es".to_string()];
        let reports = orch.run_many(&codes, date()).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].entry.records_added, 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(store.load_audit("es").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn added_counts_only_what_the_store_kept() {
        let tmp = TempDir::new().unwrap();
        let (config, _server) = served(&tmp).await;
        let local = LocalStorage::new(&config.storage.root);
        let orch = Orchestrator::new(
            config,
            Arc::new(StaleReads(local.clone())),
            Arc::new(RecordingNotifier::default()),
        )
        .unwrap();

        let first = orch.run_jurisdiction("es", date()).await;
        assert_eq!(first.entry.records_added, 2);

        // The diff sees an empty issue again, the store already has both.
        let second = orch.run_jurisdiction("es", date()).await;
        assert_eq!(second.status(), RunStatus::Success);
        assert_eq!(second.entry.records_added, 0);
        assert!(second.diff.unwrap().added.is_empty());
        assert_eq!(local.fetch_records("es", date()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unusable_store_fails_in_diffing() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let (mut config, _server) = served(&tmp).await;
        config.storage.root = blocker;
        let fallback = config.storage.fallback_audit_log.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let (orch, _) = orchestrator(config, Arc::clone(&notifier));

        let report = orch.run_jurisdiction("es", date()).await;
        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.stage_reached, RunStage::Diffing);
        assert_eq!(report.entry.fetch_attempts, 1);
        assert!(notifier.sent.lock().unwrap().is_empty());
        let text = std::fs::read_to_string(fallback).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let tmp = TempDir::new().unwrap();
        let (mut config, _server) = served(&tmp).await;
        config.storage.timeout_secs = 1;
        let local = LocalStorage::new(&config.storage.root);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(
            config,
            Arc::new(SlowReads(local.clone())),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        )
        .unwrap();

        let report = orch.run_jurisdiction("es", date()).await;
        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.stage_reached, RunStage::Diffing);
        assert!(report.entry.error_detail.unwrap().contains("fetch_records timed out"));
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert_eq!(local.load_audit("es").await.unwrap().len(), 1);
    }
}
