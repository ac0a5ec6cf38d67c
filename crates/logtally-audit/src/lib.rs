//! Log count reconciliation for logtally
//!
//! This crate selects target namespaces, compares each pod's expected log
//! line count with what the log backend observed, and renders the report.

mod reconciler;
mod report;
mod selector;

pub use reconciler::{AuditSettings, NoDataPolicy, PodListFailure, Reconciler, compare};
pub use report::{ReportFormat, log_outcome, render, render_json, render_text};
pub use selector::{is_target_namespace, select_namespaces};

// Re-export types used in our public API
pub use logtally_types::{AuditRunSummary, MismatchRecord, PodAuditSubject, PodOutcome};
