//! Pipeline entry points.
//!
//! - `Orchestrator`: fetch, parse, diff, persist and notify per jurisdiction
//! - `import_payload`: persist a saved payload without fetching
//! - `run_validate`: check a configuration file without network access

pub mod diff;
pub mod import;
pub mod run;
pub mod validate;

pub use diff::{DiffEngine, DiffOutcome, DiffResult, collapse};
pub use import::{ImportSummary, import_payload};
pub use run::{Orchestrator, RunReport};
pub use validate::run_validate;
