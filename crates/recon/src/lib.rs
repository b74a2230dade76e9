//! `vouch-recon` -- Purchase-obligation reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded tabular records, matches
//! obligations against an evidence pool through a cascading strategy
//! set, confirms payments against the accounting ledger, and returns an
//! annotated result with a structured diagnostic report. No CLI or IO
//! dependencies.

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod ledger;
pub mod matcher;
pub mod model;
pub mod subset_sum;
pub mod validate;

pub use config::ReconConfig;
pub use engine::run;
pub use error::ReconError;
pub use model::{ReconInput, ReconResult};
pub use validate::{DiagnosticReport, ReportStatus};
