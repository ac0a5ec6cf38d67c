//! HTTP client for Loki's range query API

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;
use url::Url;

use logtally_types::{CountError, LogCountQuery, LogCountSource};

use crate::query::duration_literal;
use crate::response::parse_count;

/// Range query endpoint, relative to the Loki base address
pub const QUERY_RANGE_PATH: &str = "loki/api/v1/query_range";

/// Header that scopes a request to one tenant
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Loki client answering log count queries
#[derive(Debug, Clone)]
pub struct LokiClient {
    http_client: reqwest::Client,
    endpoint: Url,
}

impl LokiClient {
    /// Create a client for the Loki instance at `base_address`.
    /// Every request is bounded by `timeout`.
    pub fn new(base_address: &Url, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for Loki")?;

        // Url::join replaces the last path segment unless the base ends with '/'
        let mut base = base_address.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(QUERY_RANGE_PATH)
            .context(format!("Invalid Loki address: {}", base_address))?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LogCountSource for LokiClient {
    async fn count(&self, query: &LogCountQuery) -> Result<u64, CountError> {
        let params = [
            ("query", query.query.clone()),
            ("start", unix_nanos(query.start)?),
            ("end", unix_nanos(query.end)?),
            ("step", duration_literal(query.step)),
        ];

        let response = self
            .http_client
            .get(self.endpoint.clone())
            .query(&params)
            .header(TENANT_HEADER, &query.tenant)
            .send()
            .await
            .map_err(|e| CountError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| CountError::Transport(e.to_string()))?;

        debug!(
            tenant = %query.tenant,
            query = %query.query,
            status,
            body_len = body.len(),
            "Loki query returned"
        );

        parse_count(status, &body)
    }
}

fn unix_nanos(instant: DateTime<Utc>) -> Result<String, CountError> {
    instant
        .timestamp_nanos_opt()
        .map(|n| n.to_string())
        .ok_or_else(|| {
            CountError::InvalidWindow(format!("{instant} cannot be expressed in Unix nanoseconds"))
        })
}
