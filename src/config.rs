//! Configuration file and command-line overrides

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use logtally_audit::{AuditSettings, NoDataPolicy, PodListFailure};
use logtally_k8s::{ConnectOptions, DEFAULT_EXPECTED_COUNT_ANNOTATION};
use logtally_loki::{DEFAULT_POD_LABEL, QueryBuilder};

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "logtally.toml";

const DEFAULT_NAMESPACE_PREFIX: &str = "logger-ns";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Contents of the TOML config file; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub kubeconfig_path: Option<PathBuf>,
    pub context: Option<String>,
    pub namespace_prefix: Option<String>,
    pub loki_address: Option<String>,
    pub expected_count_annotation: Option<String>,
    pub pod_label: Option<String>,
    pub no_data_policy: Option<NoDataPolicy>,
    pub pod_list_failure: Option<PodListFailure>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Read the config file.
    ///
    /// An explicitly requested file must exist. The default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).context(format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Values given on the command line, which win over the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub namespace_prefix: Option<String>,
    pub loki_address: Option<String>,
    pub kubeconfig_path: Option<PathBuf>,
    pub context: Option<String>,
}

/// Fully resolved configuration for one run
#[derive(Debug)]
pub struct Config {
    pub kubeconfig_path: Option<PathBuf>,
    pub context: Option<String>,
    pub loki_address: Url,
    pub timeout: Duration,
    pub expected_count_annotation: String,
    pub settings: AuditSettings,
}

impl Config {
    /// Merge the file with command-line overrides and validate the result
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self> {
        let Some(address) = overrides.loki_address.or(file.loki_address) else {
            bail!("loki_address is not set (config file or --loki-address)");
        };
        let loki_address =
            Url::parse(&address).context(format!("Invalid loki_address: {}", address))?;
        if !matches!(loki_address.scheme(), "http" | "https") {
            bail!("loki_address must be an http or https URL: {}", address);
        }

        let timeout_secs = file.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }

        let pod_label = file
            .pod_label
            .unwrap_or_else(|| DEFAULT_POD_LABEL.to_string());
        if pod_label.is_empty() {
            bail!("pod_label must not be empty");
        }

        let expected_count_annotation = file
            .expected_count_annotation
            .unwrap_or_else(|| DEFAULT_EXPECTED_COUNT_ANNOTATION.to_string());
        if expected_count_annotation.is_empty() {
            bail!("expected_count_annotation must not be empty");
        }

        let settings = AuditSettings {
            namespace_prefix: overrides
                .namespace_prefix
                .or(file.namespace_prefix)
                .unwrap_or_else(|| DEFAULT_NAMESPACE_PREFIX.to_string()),
            query_builder: QueryBuilder::new(pod_label),
            no_data_policy: file.no_data_policy.unwrap_or_default(),
            pod_list_failure: file.pod_list_failure.unwrap_or_default(),
        };

        Ok(Self {
            kubeconfig_path: overrides.kubeconfig_path.or(file.kubeconfig_path),
            context: overrides.context.or(file.context),
            loki_address,
            timeout: Duration::from_secs(timeout_secs),
            expected_count_annotation,
            settings,
        })
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            kubeconfig_path: self.kubeconfig_path.clone(),
            context: self.context.clone(),
            timeout: self.timeout,
            annotation_key: self.expected_count_annotation.clone(),
        }
    }
}
