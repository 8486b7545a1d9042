//! Shared helpers for span construction.

use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value::Value};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const NANOS_PER_MILLI: u64 = 1_000_000;

/// The kind of a span, mirroring the OTLP enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Handles a request from a remote caller.
    #[default]
    Server,
    /// Issues a request to a remote callee.
    Client,
    /// Does not cross a process boundary.
    Internal,
    /// Publishes to a message broker.
    Producer,
    /// Consumes from a message broker.
    Consumer,
}

impl SpanKind {
    /// The OTLP wire value for this kind.
    #[must_use]
    pub fn as_proto(self) -> i32 {
        match self {
            SpanKind::Internal => 1,
            SpanKind::Server => 2,
            SpanKind::Client => 3,
            SpanKind::Producer => 4,
            SpanKind::Consumer => 5,
        }
    }

    /// Parse a kind from its lowercase name, defaulting to `Server` for
    /// unknown input as the wire format's consumers expect.
    #[must_use]
    pub fn parse(kind: &str) -> Self {
        match kind {
            "client" => SpanKind::Client,
            "internal" => SpanKind::Internal,
            "producer" => SpanKind::Producer,
            "consumer" => SpanKind::Consumer,
            _ => SpanKind::Server,
        }
    }
}

pub(crate) fn str_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

pub(crate) fn int_kv(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::IntValue(value)),
        }),
    }
}

pub(crate) fn bool_kv(key: &str, value: bool) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::BoolValue(value)),
        }),
    }
}

pub(crate) fn double_kv(key: &str, value: f64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::DoubleValue(value)),
        }),
    }
}

const LOWERCASE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const HEX_CHARSET: &[u8] = b"0123456789abcdef";

pub(crate) fn random_lowercase<R: Rng + ?Sized>(length: usize, rng: &mut R) -> String {
    (0..length)
        .map(|_| LOWERCASE_CHARSET[rng.random_range(0..LOWERCASE_CHARSET.len())] as char)
        .collect()
}

pub(crate) fn random_hex<R: Rng + ?Sized>(length: usize, rng: &mut R) -> String {
    (0..length)
        .map(|_| HEX_CHARSET[rng.random_range(0..HEX_CHARSET.len())] as char)
        .collect()
}

/// Nanoseconds since the Unix epoch, now.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

/// A span paired with its owning service, grouped into resource spans once a
/// generation walk completes.
pub(crate) struct ServiceSpan {
    pub(crate) service: String,
    pub(crate) span: opentelemetry_proto::tonic::trace::v1::Span,
}

/// Group emitted spans by service into resource spans, one group per service,
/// each carrying `service.name` plus synthesized resource attributes. The
/// `BTreeMap` keeps grouping order deterministic for seeded runs.
pub(crate) fn group_by_service<R: Rng + ?Sized>(
    spans: Vec<ServiceSpan>,
    extra_resource_attributes: &[(String, String)],
    rng: &mut R,
) -> crate::Trace {
    use opentelemetry_proto::tonic::{resource::v1::Resource, trace::v1 as tracepb};
    use std::collections::BTreeMap;

    let mut by_service: BTreeMap<String, Vec<tracepb::Span>> = BTreeMap::new();
    for ss in spans {
        by_service.entry(ss.service).or_default().push(ss.span);
    }

    let resource_spans = by_service
        .into_iter()
        .map(|(service, spans)| {
            let mut attrs = Vec::new();
            for (key, value) in crate::semantic::resource_attributes(rng) {
                attrs.push(str_kv(&key, &value));
            }
            for (key, value) in extra_resource_attributes {
                if key != "service.name" {
                    attrs.push(str_kv(key, value));
                }
            }
            attrs.push(str_kv("service.name", &service));
            tracepb::ResourceSpans {
                resource: Some(Resource {
                    attributes: attrs,
                    ..Default::default()
                }),
                scope_spans: vec![tracepb::ScopeSpans {
                    scope: None,
                    spans,
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }
        })
        .collect();

    crate::Trace::from_resource_spans(resource_spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn span_kind_parses_known_names() {
        assert_eq!(SpanKind::parse("server"), SpanKind::Server);
        assert_eq!(SpanKind::parse("client"), SpanKind::Client);
        assert_eq!(SpanKind::parse("internal"), SpanKind::Internal);
        assert_eq!(SpanKind::parse("producer"), SpanKind::Producer);
        assert_eq!(SpanKind::parse("consumer"), SpanKind::Consumer);
        assert_eq!(SpanKind::parse("anything-else"), SpanKind::Server);
    }

    #[test]
    fn random_strings_have_requested_length() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(random_lowercase(12, &mut rng).len(), 12);
        assert_eq!(random_hex(16, &mut rng).len(), 16);
        assert!(random_hex(8, &mut rng).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
