//! Loki integration for logtally
//!
//! This crate builds the per-pod log count query, talks to Loki's
//! `query_range` endpoint, and turns the response into a single count.

mod client;
mod query;
mod response;

pub use client::{LokiClient, QUERY_RANGE_PATH, TENANT_HEADER};
pub use query::{DEFAULT_POD_LABEL, QueryBuilder, build_query, duration_literal, query_window};
pub use response::parse_count;

// Re-export types used in our public API
pub use logtally_types::{CountError, LogCountQuery, LogCountSource};
