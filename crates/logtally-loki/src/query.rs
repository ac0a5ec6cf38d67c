use chrono::{DateTime, TimeDelta, Utc};

use logtally_types::{CountError, LogCountQuery};

/// Stream label that carries the pod name
pub const DEFAULT_POD_LABEL: &str = "pod_name";

/// Logs are expected to be fully counted within one hour of pod start
const WINDOW_SECS: i64 = 60 * 60;

/// Length of the counting window after pod start
pub fn query_window() -> TimeDelta {
    TimeDelta::seconds(WINDOW_SECS)
}

/// Builds log count queries against a configurable pod label
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    pod_label: String,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_POD_LABEL)
    }
}

impl QueryBuilder {
    pub fn new(pod_label: impl Into<String>) -> Self {
        Self {
            pod_label: pod_label.into(),
        }
    }

    pub fn pod_label(&self) -> &str {
        &self.pod_label
    }

    /// Build the count query for one pod.
    ///
    /// The window starts at the pod's start time and spans [`query_window`];
    /// the step equals the window so exactly one bucket is produced.
    pub fn build(
        &self,
        pod_start: Option<DateTime<Utc>>,
        pod_name: &str,
        namespace: &str,
    ) -> Result<LogCountQuery, CountError> {
        let start = pod_start.ok_or_else(|| {
            CountError::InvalidWindow(format!("pod {pod_name} has no recorded start time"))
        })?;

        let window = query_window();
        let end = start.checked_add_signed(window).ok_or_else(|| {
            CountError::InvalidWindow(format!("pod {pod_name} start time {start} is out of range"))
        })?;

        let query = format!(
            "count_over_time({{{}=\"{}\"}}[{}])",
            self.pod_label,
            escape_label_value(pod_name),
            duration_literal(window)
        );

        Ok(LogCountQuery {
            query,
            start,
            end,
            step: window,
            tenant: namespace.to_string(),
        })
    }
}

/// Build a query with the default pod label
pub fn build_query(
    pod_start: Option<DateTime<Utc>>,
    pod_name: &str,
    namespace: &str,
) -> Result<LogCountQuery, CountError> {
    QueryBuilder::default().build(pod_start, pod_name, namespace)
}

/// Format a duration as a LogQL/Prometheus duration literal ("1h", "90m", "45s")
pub fn duration_literal(duration: TimeDelta) -> String {
    let secs = duration.num_seconds();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Escape a value for use inside a double-quoted LogQL string
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            _ => escaped.push(c),
        }
    }
    escaped
}
