//! Engine configuration.
//!
//! The harness presents configuration as untyped JSON bags; the structs here
//! parse every recognized key with an accept-or-coerce step (integer-typed
//! fields take numbers, floats, and numeric strings) and reject unknown
//! keys outright.

use ballast_payload::flex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ingest wire protocols. Any other value is rejected at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum Protocol {
    /// Protobuf over HTTP, POSTed to `/v1/traces`.
    #[default]
    #[serde(rename = "otlp-http")]
    OtlpHttp,
    /// The gRPC streaming transport, default port 4317.
    #[serde(rename = "otlp-grpc")]
    OtlpGrpc,
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn seconds_or_default(timeout: u64) -> Duration {
    if timeout == 0 {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    } else {
        Duration::from_secs(timeout)
    }
}

/// Configuration for the ingest client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct IngestConfig {
    /// Base endpoint of the ingest API.
    pub endpoint: String,
    /// Wire protocol.
    pub protocol: Protocol,
    /// Tenant carried in `X-Scope-OrgID`; empty means no header.
    pub tenant: String,
    /// Request timeout in seconds. Zero falls back to 30.
    #[serde(deserialize_with = "flex::u64")]
    pub timeout: u64,
    /// Test name for metric tagging.
    pub test_name: String,
    /// Target QPS for metric tagging.
    #[serde(rename = "targetQPS", deserialize_with = "flex::u64")]
    pub target_qps: u64,
    /// Target MB/s for metric tagging.
    #[serde(rename = "targetMBps")]
    pub target_mbps: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318".to_string(),
            protocol: Protocol::default(),
            tenant: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            test_name: String::new(),
            target_qps: 0,
            target_mbps: 0.0,
        }
    }
}

impl IngestConfig {
    /// The request timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds_or_default(self.timeout)
    }

    /// Metric labels for the configured test context, when any of its
    /// fields are set.
    #[must_use]
    pub fn test_labels(&self) -> Vec<(String, String)> {
        let mut labels = Vec::new();
        if !self.test_name.is_empty() {
            labels.push(("test_name".to_string(), self.test_name.clone()));
        }
        if self.target_qps > 0 {
            labels.push(("target_qps".to_string(), self.target_qps.to_string()));
        }
        if self.target_mbps > 0.0 {
            labels.push(("target_mbps".to_string(), self.target_mbps.to_string()));
        }
        labels
    }
}

/// Configuration for the query client.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct QueryConfig {
    /// Base endpoint of the query API.
    pub endpoint: String,
    /// Tenant carried in `X-Scope-OrgID`; empty means no header.
    pub tenant: String,
    /// Request timeout in seconds. Zero falls back to 30.
    #[serde(deserialize_with = "flex::u64", default = "default_timeout")]
    pub timeout: u64,
    /// Explicit bearer token literal.
    pub bearer_token: String,
    /// Path to a file holding the bearer token.
    pub bearer_token_file: String,
}

impl QueryConfig {
    /// The request timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds_or_default(self.timeout)
    }
}

/// A named query in the workload's query table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct QueryDefinition {
    /// The search expression, passed opaquely as the `q` parameter.
    pub query: String,
    /// Result limit; zero falls back to 20 at execution time.
    #[serde(deserialize_with = "flex::usize")]
    pub limit: usize,
    /// Free-form options carried for the harness; the engine does not
    /// interpret them.
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// A time bucket: how old the queried window is relative to now.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TimeBucketConfig {
    /// Bucket name referenced by plan entries.
    pub name: String,
    /// Age of the window's near edge, e.g. `"1h"`.
    pub age_start: String,
    /// Age of the window's far edge, e.g. `"6h"`. Must exceed `age_start`.
    pub age_end: String,
    /// Selection weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// One step of the execution plan.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PlanEntry {
    /// Name of the query to execute.
    pub query_name: String,
    /// Name of the time bucket to use.
    pub bucket_name: String,
    /// Selection weight. Non-positive values are treated as 1.0.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Configuration for the query workload controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct WorkloadConfig {
    /// Target queries per second per worker.
    #[serde(rename = "targetQPS")]
    pub target_qps: f64,
    /// Rate-limiter burst multiplier.
    pub burst_multiplier: f64,
    /// Multiplier applied to the target QPS.
    pub qps_multiplier: f64,
    /// Enable adaptive backoff on server overload.
    pub enable_backoff: bool,
    /// Initial backoff in milliseconds.
    #[serde(deserialize_with = "flex::u64")]
    pub min_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(deserialize_with = "flex::u64")]
    pub max_backoff_ms: u64,
    /// Add jitter to backoff sleeps.
    pub backoff_jitter: bool,
    /// Probability of fetching a trace after a successful search.
    pub trace_fetch_probability: f64,
    /// Bidirectional shift applied to query windows, in milliseconds.
    #[serde(deserialize_with = "flex::u64")]
    pub time_window_jitter_ms: u64,
    /// Time buckets available to the plan.
    pub time_buckets: Vec<TimeBucketConfig>,
    /// Weighted execution plan.
    pub execution_plan: Vec<PlanEntry>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            target_qps: 10.0,
            burst_multiplier: 2.0,
            qps_multiplier: 1.0,
            enable_backoff: true,
            min_backoff_ms: 200,
            max_backoff_ms: 30_000,
            backoff_jitter: true,
            trace_fetch_probability: 0.1,
            time_window_jitter_ms: 0,
            time_buckets: vec![TimeBucketConfig {
                name: "recent".to_string(),
                age_start: "0m".to_string(),
                age_end: "1h".to_string(),
                weight: 1.0,
            }],
            execution_plan: vec![PlanEntry {
                query_name: "default".to_string(),
                bucket_name: "recent".to_string(),
                weight: 1.0,
            }],
        }
    }
}

/// Configuration for the byte rate limiter.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Target throughput in MB/s.
    #[serde(rename = "targetMBps")]
    pub target_mbps: f64,
    /// Burst allowance as a multiple of the per-second rate.
    pub burst_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            target_mbps: 1.0,
            burst_multiplier: 1.5,
        }
    }
}
