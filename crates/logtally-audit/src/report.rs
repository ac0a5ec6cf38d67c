//! Progress lines and the final mismatch report

use serde_json::json;
use std::fmt::Write;
use std::str::FromStr;
use tracing::{info, warn};

use logtally_types::{AuditRunSummary, PodOutcome};

/// Output format of the final report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format '{other}' (expected text or json)")),
        }
    }
}

/// Emit the progress line for one pod as soon as it reaches a terminal state
pub fn log_outcome(outcome: &PodOutcome) {
    let pod = outcome.pod();
    let namespace = outcome.namespace();

    match outcome {
        PodOutcome::Matched { count, .. } => {
            info!(pod, namespace, expected = count, observed = count, "Match");
        }
        PodOutcome::Mismatched(record) => {
            warn!(
                pod,
                namespace,
                expected = record.expected,
                observed = record.observed,
                "Mismatch"
            );
        }
        PodOutcome::ExpectedCountUnavailable { expected, .. } => {
            warn!(
                pod,
                namespace,
                reason = %expected.describe(),
                "Skipping pod, expected log line count unavailable"
            );
        }
        PodOutcome::QueryFailed { error, .. } => {
            warn!(
                pod,
                namespace,
                kind = error.kind(),
                error = %error,
                "Skipping pod, failed to get observed log line count"
            );
        }
    }
}

/// Render the final report in the requested format
pub fn render(summary: &AuditRunSummary, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(summary)),
        ReportFormat::Json => render_json(summary),
    }
}

/// Line-oriented report: mismatches in accumulation order, then the counters
pub fn render_text(summary: &AuditRunSummary) -> String {
    let mut out = String::new();

    if summary.mismatches.is_empty() {
        out.push_str("No mismatches found\n");
    } else {
        out.push_str("Mismatch records:\n");
        for record in &summary.mismatches {
            let _ = writeln!(
                out,
                "Pod: {}, Namespace: {}, Expected: {}, Observed: {}",
                record.pod_name, record.namespace, record.expected, record.observed
            );
        }
    }

    if !summary.skipped_namespaces.is_empty() {
        let _ = writeln!(
            out,
            "Skipped namespaces: {}",
            summary.skipped_namespaces.join(", ")
        );
    }

    let _ = write!(
        out,
        "Summary: {} matched, {} mismatched, {} skipped",
        summary.matched,
        summary.mismatched(),
        summary.skipped
    );
    if !summary.skipped_by_kind.is_empty() {
        let kinds = summary
            .skipped_by_kind
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(out, " ({kinds})");
    }
    out.push('\n');

    out
}

pub fn render_json(summary: &AuditRunSummary) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&json!({
        "mismatches": summary.mismatches,
        "matched": summary.matched,
        "mismatched": summary.mismatched(),
        "skipped": summary.skipped,
        "skipped_by_kind": summary.skipped_by_kind,
        "skipped_namespaces": summary.skipped_namespaces,
    }))
}
