//! Metric emission.
//!
//! ## Metrics
//!
//! `ingestion_bytes_total`: Total bytes pushed to the ingest API
//! `ingestion_traces_total`: Total traces pushed
//! `ingestion_duration_seconds`: Per-push wall time
//! `ingestion_rate_bytes_per_sec`: Per-push byte rate
//! `query_duration_seconds`: Per-search wall time
//! `query_requests_total`: Searches issued
//! `query_failures_total`: Searches that failed
//! `query_failures_by_status`: Failures, labeled by HTTP status
//! `query_spans_returned`: Traces returned per search, when non-zero
//! `query_backoff_events_total`: Backoff growth events
//! `query_backoff_duration_seconds`: Backoff growth per event
//! `trace_fetch_latency_seconds`: Per-fetch wall time
//! `trace_fetch_failures_total`: Fetches that failed
//! `query_time_bucket_queries_total`: Searches, labeled by time bucket
//! `query_time_bucket_duration_seconds`: Search wall time by time bucket
//!
//! All samples go through the `metrics` facade; the harness installs the
//! recorder and supplies ambient tags. Labels passed here are the engine's
//! test-context labels plus per-sample context (query, bucket, status).

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub(crate) const INGESTION_BYTES_TOTAL: &str = "ingestion_bytes_total";
pub(crate) const INGESTION_TRACES_TOTAL: &str = "ingestion_traces_total";
pub(crate) const INGESTION_DURATION_SECONDS: &str = "ingestion_duration_seconds";
pub(crate) const INGESTION_RATE_BYTES_PER_SEC: &str = "ingestion_rate_bytes_per_sec";
pub(crate) const QUERY_DURATION_SECONDS: &str = "query_duration_seconds";
pub(crate) const QUERY_REQUESTS_TOTAL: &str = "query_requests_total";
pub(crate) const QUERY_FAILURES_TOTAL: &str = "query_failures_total";
pub(crate) const QUERY_FAILURES_BY_STATUS: &str = "query_failures_by_status";
pub(crate) const QUERY_SPANS_RETURNED: &str = "query_spans_returned";
pub(crate) const QUERY_BACKOFF_EVENTS_TOTAL: &str = "query_backoff_events_total";
pub(crate) const QUERY_BACKOFF_DURATION_SECONDS: &str = "query_backoff_duration_seconds";
pub(crate) const TRACE_FETCH_LATENCY_SECONDS: &str = "trace_fetch_latency_seconds";
pub(crate) const TRACE_FETCH_FAILURES_TOTAL: &str = "trace_fetch_failures_total";
pub(crate) const QUERY_TIME_BUCKET_QUERIES_TOTAL: &str = "query_time_bucket_queries_total";
pub(crate) const QUERY_TIME_BUCKET_DURATION_SECONDS: &str = "query_time_bucket_duration_seconds";

/// Record a completed ingest push.
///
/// The rate sample resolves the counter-vs-gauge ambiguity of
/// `ingestion_rate_bytes_per_sec` in favor of rate semantics: bytes divided
/// by the call's wall time, emitted as a gauge.
pub(crate) fn record_ingestion(
    labels: &[(String, String)],
    bytes: u64,
    traces: u64,
    duration: Duration,
) {
    counter!(INGESTION_BYTES_TOTAL, labels).increment(bytes);
    counter!(INGESTION_TRACES_TOTAL, labels).increment(traces);
    histogram!(INGESTION_DURATION_SECONDS, labels).record(duration.as_secs_f64());
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        #[allow(clippy::cast_precision_loss)]
        gauge!(INGESTION_RATE_BYTES_PER_SEC, labels).set(bytes as f64 / secs);
    }
}

/// Record a completed (or failed) search.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn record_query(
    labels: &[(String, String)],
    query_name: &str,
    duration: Duration,
    spans: usize,
    status: Option<u16>,
    success: bool,
) {
    let mut labels = labels.to_vec();
    labels.push(("query".to_string(), query_name.to_string()));

    histogram!(QUERY_DURATION_SECONDS, &labels).record(duration.as_secs_f64());
    counter!(QUERY_REQUESTS_TOTAL, &labels).increment(1);

    if !success {
        counter!(QUERY_FAILURES_TOTAL, &labels).increment(1);
        if let Some(status) = status {
            let mut status_labels = labels.clone();
            status_labels.push(("status".to_string(), status.to_string()));
            counter!(QUERY_FAILURES_BY_STATUS, &status_labels).increment(1);
        }
    }

    if spans > 0 {
        histogram!(QUERY_SPANS_RETURNED, &labels).record(spans as f64);
    }
}

/// Record a backoff growth event of `delta`.
pub(crate) fn record_backoff(labels: &[(String, String)], delta: Duration) {
    counter!(QUERY_BACKOFF_EVENTS_TOTAL, labels).increment(1);
    histogram!(QUERY_BACKOFF_DURATION_SECONDS, labels).record(delta.as_secs_f64());
}

/// Record a trace fetch attempt.
pub(crate) fn record_trace_fetch(labels: &[(String, String)], duration: Duration, success: bool) {
    histogram!(TRACE_FETCH_LATENCY_SECONDS, labels).record(duration.as_secs_f64());
    if !success {
        counter!(TRACE_FETCH_FAILURES_TOTAL, labels).increment(1);
    }
}

/// Record a search against a named time bucket.
pub(crate) fn record_time_bucket(labels: &[(String, String)], bucket: &str, duration: Duration) {
    let mut labels = labels.to_vec();
    labels.push(("bucket".to_string(), bucket.to_string()));
    counter!(QUERY_TIME_BUCKET_QUERIES_TOTAL, &labels).increment(1);
    histogram!(QUERY_TIME_BUCKET_DURATION_SECONDS, &labels).record(duration.as_secs_f64());
}
