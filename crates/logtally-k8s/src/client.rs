//! Kubernetes client for logtally

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::Api;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use logtally_types::{ClusterSource, ExpectedCount, PodAuditSubject};

/// Pod annotation holding the number of log lines the pod emitted
pub const DEFAULT_EXPECTED_COUNT_ANNOTATION: &str = "total_log_lines";

/// How to reach the cluster
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Explicit kubeconfig file; falls back to kube's standard lookup
    pub kubeconfig_path: Option<PathBuf>,
    /// Kubeconfig context; falls back to the current context
    pub context: Option<String>,
    /// Applied to connecting to and reading from the API server
    pub timeout: Duration,
    /// Annotation read for the expected log line count
    pub annotation_key: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            kubeconfig_path: None,
            context: None,
            timeout: Duration::from_secs(30),
            annotation_key: DEFAULT_EXPECTED_COUNT_ANNOTATION.to_string(),
        }
    }
}

/// Kubernetes client wrapper
pub struct KubeClient {
    client: kube::Client,
    annotation_key: String,
}

impl KubeClient {
    /// Load credentials and create a client
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let mut config = match (&options.kubeconfig_path, &options.context) {
            (None, None) => kube::Config::infer()
                .await
                .context("Failed to load cluster credentials. Is kubectl configured?")?,
            (path, context) => {
                let kubeconfig = match path {
                    Some(path) => Kubeconfig::read_from(path).context(format!(
                        "Failed to read kubeconfig from {}",
                        path.display()
                    ))?,
                    None => Kubeconfig::read()
                        .context("Failed to read kubeconfig. Is kubectl configured?")?,
                };

                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: context.clone(),
                        ..Default::default()
                    },
                )
                .await
                .context(format!(
                    "Failed to create config for context: {}",
                    context.as_deref().unwrap_or("<current>")
                ))?
            }
        };

        config.connect_timeout = Some(options.timeout);
        config.read_timeout = Some(options.timeout);

        let client = kube::Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self {
            client,
            annotation_key: options.annotation_key.clone(),
        })
    }
}

#[async_trait]
impl ClusterSource for KubeClient {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .context("Failed to list namespaces")?;

        debug!(count = list.items.len(), "Listed namespaces");

        Ok(list
            .items
            .into_iter()
            .map(|ns| ns.metadata.name.unwrap_or_default())
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodAuditSubject>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default())
            .await
            .context(format!("Failed to list pods in namespace {}", namespace))?;

        debug!(namespace, count = list.items.len(), "Listed pods");

        Ok(list
            .items
            .into_iter()
            .map(|pod| pod_to_subject(pod, namespace, &self.annotation_key))
            .collect())
    }
}

/// Convert a k8s Pod to the subject of an audit
pub fn pod_to_subject(pod: Pod, namespace: &str, annotation_key: &str) -> PodAuditSubject {
    let expected = ExpectedCount::from_metadata(
        pod.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotation_key))
            .map(String::as_str),
    );

    let started_at = pod.status.and_then(|s| s.start_time).map(|t| t.0);

    PodAuditSubject::new(
        pod.metadata.name.unwrap_or_default(),
        namespace.to_string(),
        started_at,
        expected,
    )
}
