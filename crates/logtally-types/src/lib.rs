//! Shared types for logtally
//!
//! This crate contains the audit data model, the per-pod error type, and the
//! traits the reconciler uses to reach the cluster and the log backend.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Audit Subjects
// ============================================================================

/// Expected log line count as recorded in pod metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpectedCount {
    /// A parseable non-negative integer
    Known(u64),
    /// The metadata key is not present on the pod
    Missing,
    /// The metadata key is present but not a non-negative integer
    Unparseable(String),
}

impl ExpectedCount {
    /// Interpret a raw metadata value. The value is taken verbatim, no trimming.
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value {
            None => Self::Missing,
            Some(raw) => raw
                .parse::<u64>()
                .map(Self::Known)
                .unwrap_or_else(|_| Self::Unparseable(raw.to_string())),
        }
    }

    pub fn known(&self) -> Option<u64> {
        match self {
            Self::Known(n) => Some(*n),
            _ => None,
        }
    }

    /// Human readable reason when the count is not usable
    pub fn describe(&self) -> String {
        match self {
            Self::Known(n) => n.to_string(),
            Self::Missing => "expected count metadata is missing".to_string(),
            Self::Unparseable(raw) => format!("expected count {raw:?} is not a non-negative integer"),
        }
    }
}

/// One pod to be audited, built fresh from live cluster state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodAuditSubject {
    pub name: String,
    pub namespace: String,
    /// Absent when the pod has not reported a start time yet
    pub started_at: Option<DateTime<Utc>>,
    pub expected: ExpectedCount,
}

impl PodAuditSubject {
    pub fn new(
        name: String,
        namespace: String,
        started_at: Option<DateTime<Utc>>,
        expected: ExpectedCount,
    ) -> Self {
        Self {
            name,
            namespace,
            started_at,
            expected,
        }
    }
}

// ============================================================================
// Log Count Queries
// ============================================================================

/// A time-bounded log count query for a single pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogCountQuery {
    /// Backend query text
    pub query: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Equal to the window length so a single data point comes back
    pub step: TimeDelta,
    /// Tenant the query is scoped to (the pod's namespace)
    pub tenant: String,
}

impl LogCountQuery {
    pub fn window(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Why a pod's observed count could not be obtained
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CountError {
    #[error("invalid query window: {0}")]
    InvalidWindow(String),

    #[error("request to log backend failed: {0}")]
    Transport(String),

    #[error("log backend reported failure: {0}")]
    BackendStatus(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("backend returned no result series for the query")]
    NoData,
}

impl CountError {
    /// Stable identifier for logs and the skip breakdown
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidWindow(_) => "invalid_window",
            Self::Transport(_) => "transport",
            Self::BackendStatus(_) => "backend_status",
            Self::MalformedResponse(_) => "malformed_response",
            Self::NoData => "no_data",
        }
    }
}

// ============================================================================
// Audit Results
// ============================================================================

/// A pod whose observed count disagrees with its expected count
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MismatchRecord {
    pub pod_name: String,
    pub namespace: String,
    pub expected: u64,
    pub observed: u64,
}

/// Terminal state of one pod in an audit run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodOutcome {
    ExpectedCountUnavailable {
        pod: String,
        namespace: String,
        expected: ExpectedCount,
    },
    QueryFailed {
        pod: String,
        namespace: String,
        error: CountError,
    },
    Matched {
        pod: String,
        namespace: String,
        count: u64,
    },
    Mismatched(MismatchRecord),
}

impl PodOutcome {
    pub fn pod(&self) -> &str {
        match self {
            Self::ExpectedCountUnavailable { pod, .. }
            | Self::QueryFailed { pod, .. }
            | Self::Matched { pod, .. } => pod,
            Self::Mismatched(record) => &record.pod_name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::ExpectedCountUnavailable { namespace, .. }
            | Self::QueryFailed { namespace, .. }
            | Self::Matched { namespace, .. } => namespace,
            Self::Mismatched(record) => &record.namespace,
        }
    }

    /// Skip kind, or None for pods that were compared
    pub fn skip_kind(&self) -> Option<&'static str> {
        match self {
            Self::ExpectedCountUnavailable { .. } => Some("expected_count_unavailable"),
            Self::QueryFailed { error, .. } => Some(error.kind()),
            Self::Matched { .. } | Self::Mismatched(_) => None,
        }
    }
}

/// Accumulated result of one audit run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditRunSummary {
    /// In processing order: namespace order, then pod order
    pub mismatches: Vec<MismatchRecord>,
    pub matched: usize,
    pub skipped: usize,
    /// Skipped pods per failure kind
    pub skipped_by_kind: BTreeMap<String, usize>,
    /// Namespaces whose pod listing failed under the skip policy
    pub skipped_namespaces: Vec<String>,
}

impl AuditRunSummary {
    /// Fold one pod outcome into the summary
    pub fn record(&mut self, outcome: &PodOutcome) {
        match outcome {
            PodOutcome::Matched { .. } => self.matched += 1,
            PodOutcome::Mismatched(record) => self.mismatches.push(record.clone()),
            other => {
                self.skipped += 1;
                if let Some(kind) = other.skip_kind() {
                    *self.skipped_by_kind.entry(kind.to_string()).or_default() += 1;
                }
            }
        }
    }

    pub fn skip_namespace(&mut self, namespace: &str) {
        self.skipped_namespaces.push(namespace.to_string());
    }

    pub fn mismatched(&self) -> usize {
        self.mismatches.len()
    }

    /// Total pods that reached a terminal state
    pub fn processed(&self) -> usize {
        self.matched + self.mismatched() + self.skipped
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Read access to the cluster objects an audit needs
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// List every namespace name, in the order the cluster returns them
    async fn list_namespaces(&self) -> anyhow::Result<Vec<String>>;

    /// List the pods of one namespace as audit subjects
    async fn list_pods(&self, namespace: &str) -> anyhow::Result<Vec<PodAuditSubject>>;
}

/// A log backend able to answer a log count query
#[async_trait]
pub trait LogCountSource: Send + Sync {
    async fn count(&self, query: &LogCountQuery) -> Result<u64, CountError>;
}
