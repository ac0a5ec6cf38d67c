//! Kubernetes client for logtally
//!
//! This crate loads cluster credentials and lists the namespaces and pods
//! an audit run walks over.

mod client;

pub use client::{ConnectOptions, DEFAULT_EXPECTED_COUNT_ANNOTATION, KubeClient, pod_to_subject};

// Re-export types that are used in our public API
pub use logtally_types::{ClusterSource, ExpectedCount, PodAuditSubject};
