//! Bulletin monitor CLI
//!
//! One invocation per scheduled run; the exit code is the worst run status.

use std::path::PathBuf;
use std::sync::Arc;

use bulletin_monitor::{
    config::load_config,
    error::{AppError, Result},
    models::{Config, PayloadFormat, PublicationRecord, RawRecord, RunStatus},
    pipeline::{self, DiffResult, Orchestrator},
    services::{Notification, notifier_from_config},
    storage::{LocalStorage, RecordStore},
    utils::{http, log as banner},
};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};

/// Official bulletin monitor
#[derive(Parser, Debug)]
#[command(
    name = "bulletin-monitor",
    version,
    about = "Detects new and removed entries in official bulletins"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, diff, persist and notify
    Run {
        /// Jurisdiction code (repeatable)
        #[arg(short, long = "jurisdiction")]
        jurisdictions: Vec<String>,

        /// Run every enabled jurisdiction
        #[arg(long, conflicts_with = "jurisdictions")]
        all: bool,

        /// Bulletin date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List configured jurisdictions
    List,

    /// Validate the configuration file
    Validate,

    /// Send a sample notification through the configured notifier
    TestNotify {
        #[arg(short, long)]
        jurisdiction: Option<String>,
    },

    /// Parse a saved payload and persist its records (no notification)
    Import {
        #[arg(short, long)]
        jurisdiction: String,

        #[arg(long)]
        date: NaiveDate,

        #[arg(long)]
        file: PathBuf,

        /// Payload format (default: the jurisdiction's native one)
        #[arg(long, value_parser = parse_format)]
        format: Option<PayloadFormat>,
    },

    /// Print recent audit entries
    History {
        #[arg(short, long)]
        jurisdiction: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn parse_format(value: &str) -> std::result::Result<PayloadFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "html" => Ok(PayloadFormat::Html),
        "xml" => Ok(PayloadFormat::Xml),
        "json" => Ok(PayloadFormat::Json),
        other => Err(format!("unknown format '{other}' (expected html, xml or json)")),
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// First enabled jurisdiction, used when none is given.
fn default_jurisdiction(config: &Config) -> Result<String> {
    config
        .enabled_codes()
        .into_iter()
        .next()
        .ok_or_else(|| AppError::config("no enabled jurisdiction configured"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli.config)?;
    log::debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Run {
            jurisdictions,
            all,
            date,
        } => {
            config.validate_settings()?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let codes = if all {
                config.enabled_codes()
            } else if jurisdictions.is_empty() {
                vec![default_jurisdiction(&config)?]
            } else {
                jurisdictions
            };

            let client = http::create_async_client(&config.fetch)?;
            let notifier = notifier_from_config(&config.notifier, &client)?;
            let store: Arc<dyn RecordStore> = Arc::new(LocalStorage::new(&config.storage.root));
            let orchestrator = Orchestrator::new(config, store, notifier)?;

            banner::header(&format!("Bulletin run for {date}"));
            let reports = orchestrator.run_many(&codes, date).await;

            let worst = RunStatus::worst(reports.iter().map(|r| r.status()));
            let items: Vec<(&str, String)> = reports
                .iter()
                .map(|r| {
                    let e = &r.entry;
                    (
                        e.jurisdiction.as_str(),
                        format!(
                            "{} (+{} -{}, {} fetched)",
                            e.status.as_str(),
                            e.records_added,
                            e.records_removed,
                            e.records_fetched
                        ),
                    )
                })
                .collect();
            banner::summary("Run", &items);

            std::process::exit(worst.exit_code());
        }

        Command::List => {
            banner::header("Configured jurisdictions");
            for j in &config.jurisdictions {
                banner::sub_item(&format!(
                    "{:<6} {:<40} {:<17} {:?}{}",
                    j.code,
                    j.display_name,
                    j.fetch_method_name(),
                    j.comparison,
                    if j.enabled { "" } else { " (disabled)" }
                ));
            }
        }

        Command::Validate => pipeline::run_validate(&config)?,

        Command::TestNotify { jurisdiction } => {
            let code = match jurisdiction {
                Some(code) => code,
                None => default_jurisdiction(&config)?,
            };
            let j = config
                .jurisdiction(&code)
                .ok_or_else(|| AppError::config(format!("unknown jurisdiction '{code}'")))?;

            let today = Local::now().date_naive();
            let mut diff = DiffResult::empty(&j.code, today);
            diff.added.push(PublicationRecord::new(
                &j.code,
                today,
                RawRecord {
                    title: "Sample entry sent by test-notify".into(),
                    section: "Test".into(),
                    ..Default::default()
                },
            ));
            diff.total_fetched = 1;

            let client = http::create_async_client(&config.fetch)?;
            let notifier = notifier_from_config(&config.notifier, &client)?;
            let notification = Notification::from_diff(
                &j.display_name,
                &diff,
                &j.keywords,
                config.notifier.max_listed,
            );
            notifier
                .notify(&notification)
                .await
                .map_err(|e| AppError::config(format!("test notification failed: {e}")))?;
            log::info!("Test notification sent for {}", j.code);
        }

        Command::Import {
            jurisdiction,
            date,
            file,
            format,
        } => {
            let store = LocalStorage::new(&config.storage.root);
            let summary =
                pipeline::import_payload(&config, &store, &jurisdiction, date, &file, format)
                    .await?;
            banner::summary(
                "Import",
                &[
                    ("Parsed", summary.parsed.to_string()),
                    ("Inserted", summary.inserted.to_string()),
                ],
            );
        }

        Command::History {
            jurisdiction,
            limit,
        } => {
            let code = config
                .jurisdiction(&jurisdiction)
                .map(|j| j.code.clone())
                .unwrap_or(jurisdiction);
            let store = LocalStorage::new(&config.storage.root);
            let entries = store.load_audit(&code).await?;

            banner::header(&format!("Last {} run(s) for {}", limit, code));
            for e in entries.iter().rev().take(limit) {
                banner::sub_item(&format!(
                    "{} {} {:<7} +{} -{} attempts={}{}",
                    e.started_at.format("%Y-%m-%d %H:%M:%S"),
                    e.issue_date,
                    e.status.as_str(),
                    e.records_added,
                    e.records_removed,
                    e.fetch_attempts,
                    e.error_detail
                        .as_deref()
                        .map(|d| format!(" ({d})"))
                        .unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}
