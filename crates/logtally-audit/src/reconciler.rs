//! Per-pod reconciliation of expected vs. observed log line counts

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info};

use logtally_loki::QueryBuilder;
use logtally_types::{
    AuditRunSummary, ClusterSource, CountError, LogCountSource, MismatchRecord, PodAuditSubject,
    PodOutcome,
};

use crate::report::log_outcome;
use crate::selector::select_namespaces;

/// How an empty backend result is interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoDataPolicy {
    /// Skip the pod and report `no_data`
    #[default]
    Failure,
    /// Treat the pod as having zero observed lines
    Zero,
}

/// What to do when a selected namespace's pods cannot be listed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodListFailure {
    /// Abort the whole run
    #[default]
    Abort,
    /// Record the namespace as skipped and continue
    Skip,
}

/// Knobs for one audit run
#[derive(Clone, Debug)]
pub struct AuditSettings {
    pub namespace_prefix: String,
    pub query_builder: QueryBuilder,
    pub no_data_policy: NoDataPolicy,
    pub pod_list_failure: PodListFailure,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            namespace_prefix: "logger-ns".to_string(),
            query_builder: QueryBuilder::default(),
            no_data_policy: NoDataPolicy::default(),
            pod_list_failure: PodListFailure::default(),
        }
    }
}

/// Drives an audit run over the cluster, one pod at a time
pub struct Reconciler<C, L> {
    cluster: C,
    logs: L,
    settings: AuditSettings,
}

impl<C: ClusterSource, L: LogCountSource> Reconciler<C, L> {
    pub fn new(cluster: C, logs: L, settings: AuditSettings) -> Self {
        Self {
            cluster,
            logs,
            settings,
        }
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    /// Audit every pod in every target namespace.
    ///
    /// Namespaces and pods are visited in enumeration order and each query is
    /// awaited before the next starts, so mismatches come out in that order.
    /// Per-pod failures are skipped; listing failures abort the run (unless the
    /// pod listing policy says to skip the namespace).
    pub async fn run(&self) -> Result<AuditRunSummary> {
        let namespaces = self
            .cluster
            .list_namespaces()
            .await
            .context("Failed to enumerate namespaces")?;

        let targets = select_namespaces(&namespaces, &self.settings.namespace_prefix);
        info!(
            total = namespaces.len(),
            selected = targets.len(),
            prefix = %self.settings.namespace_prefix,
            "Selected target namespaces"
        );

        let mut summary = AuditRunSummary::default();

        for namespace in targets {
            let pods = match self.cluster.list_pods(namespace).await {
                Ok(pods) => pods,
                Err(e) if self.settings.pod_list_failure == PodListFailure::Skip => {
                    error!(namespace, error = %format!("{e:#}"), "Skipping namespace, pod listing failed");
                    summary.skip_namespace(namespace);
                    continue;
                }
                Err(e) => {
                    return Err(e.context(format!("Failed to enumerate pods in namespace {namespace}")));
                }
            };

            for subject in &pods {
                let outcome = self.audit_pod(subject).await;
                log_outcome(&outcome);
                summary.record(&outcome);
            }
        }

        Ok(summary)
    }

    /// Take one pod to its terminal state
    pub async fn audit_pod(&self, subject: &PodAuditSubject) -> PodOutcome {
        let Some(expected) = subject.expected.known() else {
            return PodOutcome::ExpectedCountUnavailable {
                pod: subject.name.clone(),
                namespace: subject.namespace.clone(),
                expected: subject.expected.clone(),
            };
        };

        match self.observe(subject).await {
            Ok(observed) => compare(subject, expected, observed),
            Err(error) => PodOutcome::QueryFailed {
                pod: subject.name.clone(),
                namespace: subject.namespace.clone(),
                error,
            },
        }
    }

    async fn observe(&self, subject: &PodAuditSubject) -> Result<u64, CountError> {
        let query = self.settings.query_builder.build(
            subject.started_at,
            &subject.name,
            &subject.namespace,
        )?;

        match self.logs.count(&query).await {
            Err(CountError::NoData) if self.settings.no_data_policy == NoDataPolicy::Zero => Ok(0),
            other => other,
        }
    }
}

/// Compare two successfully obtained counts
pub fn compare(subject: &PodAuditSubject, expected: u64, observed: u64) -> PodOutcome {
    if expected == observed {
        PodOutcome::Matched {
            pod: subject.name.clone(),
            namespace: subject.namespace.clone(),
            count: observed,
        }
    } else {
        PodOutcome::Mismatched(MismatchRecord {
            pod_name: subject.name.clone(),
            namespace: subject.namespace.clone(),
            expected,
            observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use logtally_types::{ExpectedCount, LogCountQuery};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeCluster {
        namespaces: Option<Vec<String>>,
        pods: HashMap<String, Vec<PodAuditSubject>>,
    }

    #[async_trait]
    impl ClusterSource for FakeCluster {
        async fn list_namespaces(&self) -> Result<Vec<String>> {
            self.namespaces
                .clone()
                .ok_or_else(|| anyhow::anyhow!("namespaces is forbidden"))
        }

        async fn list_pods(&self, namespace: &str) -> Result<Vec<PodAuditSubject>> {
            self.pods
                .get(namespace)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("pods is forbidden in {namespace}"))
        }
    }

    /// Answers keyed by (tenant, query text); records every query it sees
    #[derive(Default)]
    struct FakeLogs {
        answers: HashMap<(String, String), Result<u64, CountError>>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeLogs {
        fn answer(mut self, namespace: &str, pod: &str, result: Result<u64, CountError>) -> Self {
            let query = format!(r#"count_over_time({{pod_name="{pod}"}}[1h])"#);
            self.answers.insert((namespace.to_string(), query), result);
            self
        }
    }

    #[async_trait]
    impl LogCountSource for FakeLogs {
        async fn count(&self, query: &LogCountQuery) -> Result<u64, CountError> {
            self.seen.lock().unwrap().push(query.tenant.clone());
            self.answers
                .get(&(query.tenant.clone(), query.query.clone()))
                .cloned()
                .unwrap_or(Err(CountError::NoData))
        }
    }

    fn subject(name: &str, namespace: &str, expected: ExpectedCount) -> PodAuditSubject {
        PodAuditSubject::new(
            name.to_string(),
            namespace.to_string(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()),
            expected,
        )
    }

    fn cluster(namespaces: &[&str], pods: Vec<PodAuditSubject>) -> FakeCluster {
        let mut by_ns: HashMap<String, Vec<PodAuditSubject>> = namespaces
            .iter()
            .map(|ns| (ns.to_string(), Vec::new()))
            .collect();
        for pod in pods {
            by_ns.entry(pod.namespace.clone()).or_default().push(pod);
        }
        FakeCluster {
            namespaces: Some(namespaces.iter().map(|s| s.to_string()).collect()),
            pods: by_ns,
        }
    }

    #[test]
    fn test_compare() {
        let pod = subject("logger-0", "logger-ns-a", ExpectedCount::Known(5));
        assert!(matches!(compare(&pod, 5, 5), PodOutcome::Matched { count: 5, .. }));
        assert_eq!(
            compare(&pod, 5, 7),
            PodOutcome::Mismatched(MismatchRecord {
                pod_name: "logger-0".to_string(),
                namespace: "logger-ns-a".to_string(),
                expected: 5,
                observed: 7,
            })
        );
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let cluster = cluster(
            &["logger-ns-a", "other", "logger-ns-b"],
            vec![
                subject("logger-0", "logger-ns-a", ExpectedCount::Known(10)),
                subject("stray", "other", ExpectedCount::Known(1)),
                subject("logger-0", "logger-ns-b", ExpectedCount::Known(10)),
            ],
        );
        let logs = FakeLogs::default()
            .answer("logger-ns-a", "logger-0", Ok(10))
            .answer("logger-ns-b", "logger-0", Ok(8));

        let reconciler = Reconciler::new(cluster, logs, AuditSettings::default());
        let summary = reconciler.run().await.unwrap();

        assert_eq!(
            summary.mismatches,
            vec![MismatchRecord {
                pod_name: "logger-0".to_string(),
                namespace: "logger-ns-b".to_string(),
                expected: 10,
                observed: 8,
            }]
        );
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.mismatched(), 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(
            *reconciler.logs.seen.lock().unwrap(),
            vec!["logger-ns-a".to_string(), "logger-ns-b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mismatches_keep_processing_order() {
        let cluster = cluster(
            &["logger-ns-b", "logger-ns-a"],
            vec![
                subject("z", "logger-ns-b", ExpectedCount::Known(1)),
                subject("a", "logger-ns-b", ExpectedCount::Known(1)),
                subject("m", "logger-ns-a", ExpectedCount::Known(1)),
            ],
        );
        let logs = FakeLogs::default()
            .answer("logger-ns-b", "z", Ok(2))
            .answer("logger-ns-b", "a", Ok(3))
            .answer("logger-ns-a", "m", Ok(4));

        let summary = Reconciler::new(cluster, logs, AuditSettings::default())
            .run()
            .await
            .unwrap();

        let order: Vec<_> = summary
            .mismatches
            .iter()
            .map(|r| (r.namespace.as_str(), r.pod_name.as_str()))
            .collect();
        assert_eq!(order, vec![("logger-ns-b", "z"), ("logger-ns-b", "a"), ("logger-ns-a", "m")]);
    }

    #[tokio::test]
    async fn test_unusable_expected_count_is_skipped() {
        let cluster = cluster(
            &["logger-ns-a"],
            vec![
                subject("missing", "logger-ns-a", ExpectedCount::Missing),
                subject("garbage", "logger-ns-a", ExpectedCount::Unparseable("ten".to_string())),
                subject("after", "logger-ns-a", ExpectedCount::Known(5)),
            ],
        );
        let logs = FakeLogs::default().answer("logger-ns-a", "after", Ok(7));

        let reconciler = Reconciler::new(cluster, logs, AuditSettings::default());
        let summary = reconciler.run().await.unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.skipped_by_kind.get("expected_count_unavailable"), Some(&2));
        assert_eq!(summary.mismatches.len(), 1);
        assert_eq!(summary.mismatches[0].pod_name, "after");
        // Only the pod with a usable count reached the backend
        assert_eq!(reconciler.logs.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_failures_are_skipped() {
        let mut no_start = subject("pending", "logger-ns-a", ExpectedCount::Known(3));
        no_start.started_at = None;

        let cluster = cluster(
            &["logger-ns-a"],
            vec![
                no_start,
                subject("empty", "logger-ns-a", ExpectedCount::Known(3)),
                subject("broken", "logger-ns-a", ExpectedCount::Known(3)),
                subject("ok", "logger-ns-a", ExpectedCount::Known(3)),
            ],
        );
        let logs = FakeLogs::default()
            .answer("logger-ns-a", "empty", Err(CountError::NoData))
            .answer(
                "logger-ns-a",
                "broken",
                Err(CountError::BackendStatus("HTTP 500".to_string())),
            )
            .answer("logger-ns-a", "ok", Ok(3));

        let summary = Reconciler::new(cluster, logs, AuditSettings::default())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.skipped, 3);
        assert!(summary.mismatches.is_empty());
        assert_eq!(summary.skipped_by_kind.get("invalid_window"), Some(&1));
        assert_eq!(summary.skipped_by_kind.get("no_data"), Some(&1));
        assert_eq!(summary.skipped_by_kind.get("backend_status"), Some(&1));
    }

    #[tokio::test]
    async fn test_no_data_as_zero() {
        let cluster = cluster(
            &["logger-ns-a"],
            vec![
                subject("silent", "logger-ns-a", ExpectedCount::Known(0)),
                subject("lost", "logger-ns-a", ExpectedCount::Known(4)),
            ],
        );
        let settings = AuditSettings {
            no_data_policy: NoDataPolicy::Zero,
            ..Default::default()
        };

        let summary = Reconciler::new(cluster, FakeLogs::default(), settings)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.mismatches.len(), 1);
        assert_eq!(summary.mismatches[0].observed, 0);
    }

    #[tokio::test]
    async fn test_namespace_listing_failure_aborts() {
        let cluster = FakeCluster {
            namespaces: None,
            pods: HashMap::new(),
        };
        let result = Reconciler::new(cluster, FakeLogs::default(), AuditSettings::default())
            .run()
            .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to enumerate namespaces"));
    }

    #[tokio::test]
    async fn test_pod_listing_failure_aborts_by_default() {
        let mut cluster = cluster(
            &["logger-ns-a", "logger-ns-b"],
            vec![subject("logger-0", "logger-ns-a", ExpectedCount::Known(1))],
        );
        cluster.pods.remove("logger-ns-b");
        let logs = FakeLogs::default().answer("logger-ns-a", "logger-0", Ok(2));

        let err = Reconciler::new(cluster, logs, AuditSettings::default())
            .run()
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("logger-ns-b"));
    }

    #[tokio::test]
    async fn test_pod_listing_failure_skip_policy() {
        let mut cluster = cluster(
            &["logger-ns-a", "logger-ns-b"],
            vec![subject("logger-0", "logger-ns-b", ExpectedCount::Known(1))],
        );
        cluster.pods.remove("logger-ns-a");
        let logs = FakeLogs::default().answer("logger-ns-b", "logger-0", Ok(1));
        let settings = AuditSettings {
            pod_list_failure: PodListFailure::Skip,
            ..Default::default()
        };

        let summary = Reconciler::new(cluster, logs, settings).run().await.unwrap();
        assert_eq!(summary.skipped_namespaces, vec!["logger-ns-a".to_string()]);
        assert_eq!(summary.matched, 1);
    }

    #[tokio::test]
    async fn test_empty_prefix_selects_everything() {
        let cluster = cluster(
            &["kube-system", "default"],
            vec![
                subject("a", "kube-system", ExpectedCount::Known(1)),
                subject("b", "default", ExpectedCount::Known(1)),
            ],
        );
        let logs = FakeLogs::default()
            .answer("kube-system", "a", Ok(1))
            .answer("default", "b", Ok(1));
        let settings = AuditSettings {
            namespace_prefix: String::new(),
            ..Default::default()
        };

        let summary = Reconciler::new(cluster, logs, settings).run().await.unwrap();
        assert_eq!(summary.matched, 2);
    }
}
