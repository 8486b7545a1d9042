//! The JSON query client.
//!
//! Speaks the search and trace-fetch endpoints of the backend's query API.
//! Server-side numerics are decoded leniently (numbers or numeric strings),
//! and time bounds accept three forms tried in order: a duration relative
//! to now (`"1h"`), a nanosecond epoch integer, an ISO-8601 timestamp.

use crate::auth;
use crate::config::QueryConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Errors produced by [`QueryClient`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    /// Bearer token resolution failed.
    #[error("failed to resolve bearer token: {0}")]
    Auth(#[from] auth::Error),
    /// A time bound could not be interpreted in any accepted form.
    #[error("unable to parse time {0:?}")]
    Time(String),
    /// The request could not be completed.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// The server answered outside 2xx; the body is diagnostic text.
    #[error("HTTP error {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
        /// Parsed `Retry-After` seconds, when the header carried one.
        retry_after_seconds: Option<u64>,
    },
    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl Error {
    /// The HTTP status attached to this error, when a response was
    /// received at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response metadata for backoff decisions, when a response was
    /// received at all.
    #[must_use]
    pub fn response_meta(&self) -> Option<ResponseMeta> {
        match self {
            Error::Status {
                status,
                retry_after_seconds,
                ..
            } => Some(ResponseMeta {
                status: *status,
                retry_after_seconds: *retry_after_seconds,
            }),
            _ => None,
        }
    }
}

/// An integer that may arrive as a JSON number or a numeric string. An
/// empty string decodes as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FlexInt(pub i64);

impl<'de> Deserialize<'de> for FlexInt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        #[allow(clippy::cast_possible_truncation)]
        let value = match Raw::deserialize(deserializer)? {
            Raw::Int(n) => n,
            Raw::Float(f) => f as i64,
            Raw::Text(s) if s.is_empty() => 0,
            Raw::Text(s) => s
                .parse::<i64>()
                .map_err(|e| serde::de::Error::custom(format!("invalid integer {s:?}: {e}")))?,
        };
        Ok(FlexInt(value))
    }
}

impl fmt::Display for FlexInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<FlexInt> for i64 {
    fn from(value: FlexInt) -> Self {
        value.0
    }
}

/// One search hit.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchResult {
    /// The matched trace's identifier, hex encoded.
    #[serde(rename = "traceID")]
    pub trace_id: String,
    /// Service name of the trace's root span.
    pub root_service_name: String,
    /// Name of the trace's root span.
    pub root_trace_name: String,
    /// Root span start, nanoseconds since the epoch.
    #[serde(rename = "startTimeUnixNano")]
    pub start_time: FlexInt,
    /// Trace duration in milliseconds.
    pub duration_ms: FlexInt,
    /// Matched tags.
    pub tags: HashMap<String, String>,
    /// Per-service statistics, passed through uninterpreted.
    pub service_stats: serde_json::Value,
}

/// Inspection counters attached to a search response.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchMetrics {
    /// Traces inspected to answer the query.
    pub inspected_traces: FlexInt,
    /// Bytes inspected.
    pub inspected_bytes: FlexInt,
    /// Blocks inspected.
    pub inspected_blocks: FlexInt,
    /// Total blocks considered.
    pub total_blocks: FlexInt,
}

/// The search endpoint's response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchResponse {
    /// Matching traces.
    pub traces: Vec<SearchResult>,
    /// Inspection counters.
    pub metrics: SearchMetrics,
}

/// A span as returned by the trace-fetch endpoint, timestamps
/// strings-or-numbers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpanDocument {
    /// Trace identifier, hex encoded.
    pub trace_id: String,
    /// Span identifier, hex encoded.
    pub span_id: String,
    /// Parent span identifier; empty for roots.
    pub parent_span_id: String,
    /// Span name.
    pub name: String,
    /// Span kind, as the server renders it.
    pub kind: String,
    /// Start, nanoseconds since the epoch.
    #[serde(rename = "startTimeUnixNano")]
    pub start_time: FlexInt,
    /// End, nanoseconds since the epoch.
    #[serde(rename = "endTimeUnixNano")]
    pub end_time: FlexInt,
    /// Attributes, passed through uninterpreted.
    pub attributes: serde_json::Value,
    /// Status, passed through uninterpreted.
    pub status: serde_json::Value,
    /// Events, passed through uninterpreted.
    pub events: serde_json::Value,
    /// Links, passed through uninterpreted.
    pub links: serde_json::Value,
}

/// Spans within one instrumentation scope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScopeSpansDocument {
    /// The instrumentation scope, passed through uninterpreted.
    pub scope: serde_json::Value,
    /// The scope's spans.
    pub spans: Vec<SpanDocument>,
}

/// One resource batch of a fetched trace.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraceBatch {
    /// Resource attributes, passed through uninterpreted.
    pub resource: serde_json::Value,
    /// Scoped span groups.
    pub scope_spans: Vec<ScopeSpansDocument>,
}

/// A full trace retrieved by identifier.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceDocument {
    /// Resource batches.
    pub batches: Vec<TraceBatch>,
}

impl TraceDocument {
    /// Total span count across batches.
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.batches
            .iter()
            .flat_map(|b| b.scope_spans.iter())
            .map(|ss| ss.spans.len())
            .sum()
    }
}

/// Search bounds and limit.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Start bound; empty omits the parameter.
    pub start: String,
    /// End bound; empty or the literal `"now"` omits the parameter.
    pub end: String,
    /// Result limit; zero omits the parameter.
    pub limit: usize,
}

/// Metadata of a received HTTP response, fed to the backoff controller.
#[derive(Debug, Clone, Copy)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` seconds, when present and integral.
    pub retry_after_seconds: Option<u64>,
}

/// Client for the JSON search and trace-fetch API.
#[derive(Debug, Clone)]
pub struct QueryClient {
    client: reqwest::Client,
    base_url: String,
    tenant: String,
    bearer_token: String,
}

impl QueryClient {
    /// Build a client from configuration, resolving the bearer credential.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed or an
    /// explicitly configured token file cannot be read.
    pub fn new(config: &QueryConfig) -> Result<Self, Error> {
        let bearer_token =
            auth::resolve_bearer_token(&config.bearer_token, &config.bearer_token_file)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(Error::Build)?;
        let base_url = config.endpoint.trim_end_matches('/').to_string();
        debug!(endpoint = %base_url, "query client ready");

        Ok(Self {
            client,
            base_url,
            tenant: config.tenant.clone(),
            bearer_token,
        })
    }

    /// Execute a search.
    ///
    /// # Errors
    ///
    /// Returns an error on unparseable time bounds, transport failure,
    /// non-2xx status, or an undecodable body.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, Error> {
        self.search_with_meta(query, options)
            .await
            .map(|(response, _)| response)
    }

    /// Execute a search, also returning response metadata for backoff
    /// decisions.
    ///
    /// # Errors
    ///
    /// See [`QueryClient::search`]; protocol errors carry their status and
    /// any `Retry-After` value.
    pub async fn search_with_meta(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<(SearchResponse, ResponseMeta), Error> {
        let mut params: Vec<(&str, String)> = vec![("q", query.to_string())];
        if !options.start.is_empty() {
            params.push(("start", parse_time(&options.start)?.to_string()));
        }
        if !options.end.is_empty() && options.end != "now" {
            params.push(("end", parse_time(&options.end)?.to_string()));
        }
        if options.limit > 0 {
            params.push(("limit", options.limit.to_string()));
        }

        let url = format!("{}/api/search", self.base_url);
        self.get_json(&url, &params).await
    }

    /// Fetch a full trace by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or an
    /// undecodable body.
    pub async fn get_trace(&self, trace_id: &str) -> Result<TraceDocument, Error> {
        self.get_trace_with_meta(trace_id)
            .await
            .map(|(trace, _)| trace)
    }

    /// Fetch a full trace, also returning response metadata for backoff
    /// decisions.
    ///
    /// # Errors
    ///
    /// See [`QueryClient::get_trace`].
    pub async fn get_trace_with_meta(
        &self,
        trace_id: &str,
    ) -> Result<(TraceDocument, ResponseMeta), Error> {
        let url = format!("{}/api/traces/{trace_id}", self.base_url);
        self.get_json(&url, &[]).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<(T, ResponseMeta), Error> {
        let mut request = self.client.get(url);
        if !params.is_empty() {
            request = request.query(params);
        }
        if !self.tenant.is_empty() {
            request = request.header(TENANT_HEADER, &self.tenant);
        }
        if !self.bearer_token.is_empty() {
            request = request.bearer_auth(&self.bearer_token);
        }

        let response = request.send().await.map_err(Error::Transport)?;
        let status = response.status();
        let retry_after_seconds = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let meta = ResponseMeta {
            status: status.as_u16(),
            retry_after_seconds,
        };

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
                retry_after_seconds,
            });
        }

        let decoded = response.json::<T>().await.map_err(Error::Decode)?;
        Ok((decoded, meta))
    }
}

/// Parse a time bound, trying in order: a duration relative to now, a
/// nanosecond epoch integer, an ISO-8601 timestamp.
///
/// # Errors
///
/// Returns [`Error::Time`] when no form matches.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn parse_time(input: &str) -> Result<i64, Error> {
    let (negated, body) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    if let Ok(duration) = humantime::parse_duration(body) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        let offset = duration.as_nanos() as i64;
        // A negative relative bound points into the future, matching the
        // arithmetic of "now minus duration".
        return Ok(if negated { now + offset } else { now - offset });
    }

    if let Ok(nanos) = input.parse::<i64>() {
        return Ok(nanos);
    }

    if let Ok(timestamp) = chrono::DateTime::parse_from_rfc3339(input) {
        if let Some(nanos) = timestamp.timestamp_nanos_opt() {
            return Ok(nanos);
        }
    }

    Err(Error::Time(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flexible_ints_decode_numbers_and_strings() {
        let response: SearchResponse = serde_json::from_str(
            r#"{
                "traces": [
                    {"traceID": "abc123", "startTimeUnixNano": "1700000000000000000", "durationMs": 42}
                ],
                "metrics": {"inspectedTraces": "7", "inspectedBytes": 1024, "inspectedBlocks": "", "totalBlocks": 3.0}
            }"#,
        )
        .expect("deserialize");
        assert_eq!(response.traces[0].start_time.0, 1_700_000_000_000_000_000);
        assert_eq!(response.traces[0].duration_ms.0, 42);
        assert_eq!(response.metrics.inspected_traces.0, 7);
        assert_eq!(response.metrics.inspected_bytes.0, 1024);
        assert_eq!(response.metrics.inspected_blocks.0, 0);
        assert_eq!(response.metrics.total_blocks.0, 3);
    }

    #[test]
    fn unknown_response_fields_are_tolerated() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"traces": [], "metrics": {}, "partial": true, "somethingNew": {"a": 1}}"#,
        )
        .expect("deserialize");
        assert!(response.traces.is_empty());
    }

    #[test]
    fn trace_document_counts_spans_across_batches() {
        let doc: TraceDocument = serde_json::from_str(
            r#"{
                "batches": [
                    {"resource": {}, "scopeSpans": [
                        {"scope": {}, "spans": [
                            {"traceId": "t", "spanId": "a", "startTimeUnixNano": "1", "endTimeUnixNano": 2},
                            {"traceId": "t", "spanId": "b", "startTimeUnixNano": 3, "endTimeUnixNano": "4"}
                        ]}
                    ]},
                    {"resource": {}, "scopeSpans": [
                        {"scope": {}, "spans": [
                            {"traceId": "t", "spanId": "c"}
                        ]}
                    ]}
                ]
            }"#,
        )
        .expect("deserialize");
        assert_eq!(doc.span_count(), 3);
    }

    #[test]
    fn epoch_nanos_round_trip_through_parse() {
        let rendered = "1700000000000000000";
        let parsed = parse_time(rendered).expect("parse");
        assert_eq!(parsed.to_string(), rendered);
    }

    #[test]
    fn durations_resolve_relative_to_now() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("epoch")
            .as_nanos() as i64;
        let parsed = parse_time("1h").expect("parse");
        let expected = now - 3_600_000_000_000;
        assert!((parsed - expected).abs() < 5_000_000_000, "parsed {parsed}");
    }

    #[test]
    fn rfc3339_timestamps_parse() {
        let parsed = parse_time("2023-11-14T22:13:20Z").expect("parse");
        assert_eq!(parsed, 1_700_000_000_000_000_000);
    }

    #[test]
    fn garbage_time_is_rejected() {
        assert!(matches!(parse_time("soon-ish"), Err(Error::Time(_))));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = QueryConfig {
            endpoint: "http://tempo.local:3200/".to_string(),
            ..QueryConfig::default()
        };
        let client = QueryClient::new(&config).expect("client");
        assert_eq!(client.base_url, "http://tempo.local:3200");
    }
}
