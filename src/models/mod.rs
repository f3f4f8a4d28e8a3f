// src/models/mod.rs

//! Domain models for the bulletin monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod audit;
mod config;
mod jurisdiction;
mod record;

// Re-export all public types
pub use audit::{AuditDraft, AuditEntry, RunStage, RunStatus};
pub use config::{Config, FetchConfig, NotifierConfig, NotifierKind, StorageConfig};
pub use jurisdiction::{
    ComparisonMode, Extract, FetchMethod, FieldRule, JurisdictionConfig, ParserConfig,
    ParserRules, PayloadFormat,
};
pub use record::{PublicationRecord, RawRecord, content_hash, normalize_text};
