//! Shape-driven trace generation.
//!
//! Builds traces from aggregate shape parameters: span count, tree depth,
//! fan-out and its variance, attribute and event counts. Parents are chosen
//! with a bias toward shallow spans so trees look like real request trees
//! rather than chains.

use crate::cardinality::CardinalityPool;
use crate::common::{
    NANOS_PER_MILLI, ServiceSpan, SpanKind, group_by_service, int_kv, random_hex, str_kv,
    unix_nanos_now,
};
use crate::context::TraceContext;
use crate::workflow::WorkflowContext;
use crate::{Error, GeneratorConfig, Trace, semantic};
use opentelemetry_proto::tonic::trace::v1 as tracepb;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

const STATUS_OK: i32 = 1;
const STATUS_ERROR: i32 = 2;

/// Generate a trace from shape parameters.
///
/// # Errors
///
/// Returns an error when the configuration fails validation upstream; span
/// construction itself is infallible.
pub(crate) fn generate<R: Rng + ?Sized>(
    config: &GeneratorConfig,
    pool: &CardinalityPool,
    rng: &mut R,
) -> Result<Trace, Error> {
    let trace_id: [u8; 16] = rng.random();

    let tag_ctx = if config.enable_tags {
        Some(TraceContext::full(&config.cardinality_config, pool, rng))
    } else {
        None
    };

    let trace_start = unix_nanos_now() - rng.random_range(0..3600) * NANOS_PER_SECOND;

    let mut slots: Vec<SpanSlot> = Vec::with_capacity(config.spans_per_trace.max(1));

    let mut service_index = 0;
    let root = build_span(
        &SpanParams {
            trace_id: &trace_id,
            parent_span_id: None,
            depth: 0,
            service: &semantic::service_name(service_index),
            operation: None,
            start_ns: trace_start,
            duration_base_ms: config.duration_base_ms,
            duration_variance_ms: config.duration_variance_ms,
            kind_override: None,
        },
        config,
        None,
        tag_ctx.as_ref(),
        rng,
    );
    slots.push(SpanSlot {
        service: semantic::service_name(service_index),
        span: root,
        depth: 0,
        children: 0,
        max_children: max_children_for(0, config, rng),
    });

    while slots.len() < config.spans_per_trace.max(1) {
        let Some(parent_idx) = select_parent(&slots, config, rng) else {
            break;
        };

        let (parent_span_id, parent_start, parent_end, parent_depth) = {
            let p = &slots[parent_idx];
            (
                p.span.span_id.clone(),
                p.span.start_time_unix_nano,
                p.span.end_time_unix_nano,
                p.depth,
            )
        };

        let parent_duration = parent_end - parent_start;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = (rng.random::<f64>() * 0.3 * parent_duration as f64) as u64;
        let child_start = parent_start + delay;

        // The child's budget is half of what remains of the parent interval.
        let available = parent_end
            .saturating_sub(child_start)
            .saturating_sub(10 * NANOS_PER_MILLI)
            .max(NANOS_PER_MILLI);
        let base_ms = (available / NANOS_PER_MILLI / 2).max(1);

        service_index = (service_index + 1) % config.services.max(1);
        let service = semantic::service_name(service_index);

        let mut span = build_span(
            &SpanParams {
                trace_id: &trace_id,
                parent_span_id: Some(&parent_span_id),
                depth: parent_depth + 1,
                service: &service,
                operation: None,
                start_ns: child_start,
                duration_base_ms: base_ms,
                duration_variance_ms: config.duration_variance_ms,
                kind_override: None,
            },
            config,
            None,
            tag_ctx.as_ref(),
            rng,
        );
        clamp_into_parent(&mut span, parent_end);

        let child_depth = parent_depth + 1;
        let max_children = max_children_for(child_depth, config, rng);
        slots.push(SpanSlot {
            service,
            span,
            depth: child_depth,
            children: 0,
            max_children,
        });
        slots[parent_idx].children += 1;
    }

    let extras: Vec<(String, String)> = config
        .resource_attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let spans = slots
        .into_iter()
        .map(|s| ServiceSpan {
            service: s.service,
            span: s.span,
        })
        .collect();
    Ok(group_by_service(spans, &extras, rng))
}

/// A generated span alongside its tree-building bookkeeping.
struct SpanSlot {
    span: tracepb::Span,
    service: String,
    depth: u32,
    children: u32,
    max_children: u32,
}

/// Pick a parent that can still take children, weighted toward shallow spans
/// with few children.
fn select_parent<R: Rng + ?Sized>(
    slots: &[SpanSlot],
    config: &GeneratorConfig,
    rng: &mut R,
) -> Option<usize> {
    let available: Vec<usize> = (0..slots.len())
        .filter(|&i| {
            let s = &slots[i];
            s.children < s.max_children && s.depth < config.span_depth
        })
        .collect();
    if available.is_empty() {
        return None;
    }

    let weights: Vec<f64> = available
        .iter()
        .map(|&i| {
            let s = &slots[i];
            1.0 / (f64::from(s.depth) + f64::from(s.children) + 1.0)
        })
        .collect();
    let total: f64 = weights.iter().sum();
    let r = rng.random::<f64>() * total;
    let mut acc = 0.0;
    for (idx, weight) in available.iter().zip(&weights) {
        acc += weight;
        if r <= acc {
            return Some(*idx);
        }
    }
    available.first().copied()
}

/// Fan-out budget for a span at `depth`: decreases with depth, perturbed by
/// the configured variance, clamped to `[1, max_fan_out]`.
#[allow(clippy::cast_possible_truncation)]
fn max_children_for<R: Rng + ?Sized>(depth: u32, config: &GeneratorConfig, rng: &mut R) -> u32 {
    let max_fan_out = if config.max_fan_out == 0 {
        5
    } else {
        config.max_fan_out
    };
    let fan_out = if depth == 0 {
        max_fan_out
    } else {
        max_fan_out.saturating_sub(depth).max(1)
    };

    let variance = config.fan_out_variance.clamp(0.0, 1.0);
    let adjustment = f64::from(fan_out) * variance * (rng.random::<f64>() * 2.0 - 1.0);
    let adjusted = (f64::from(fan_out) + adjustment) as i64;
    u32::try_from(adjusted.max(1)).unwrap_or(1).min(max_fan_out)
}

pub(crate) struct SpanParams<'a> {
    pub(crate) trace_id: &'a [u8; 16],
    pub(crate) parent_span_id: Option<&'a [u8]>,
    pub(crate) depth: u32,
    pub(crate) service: &'a str,
    pub(crate) operation: Option<&'a str>,
    pub(crate) start_ns: u64,
    pub(crate) duration_base_ms: u64,
    pub(crate) duration_variance_ms: u64,
    pub(crate) kind_override: Option<SpanKind>,
}

/// Construct one span: duration with variance, weighted span kind, error
/// injection, and the attribute stack (service, depth, semantic, business,
/// propagated tags, synthetic padding) in that order.
pub(crate) fn build_span<R: Rng + ?Sized>(
    params: &SpanParams<'_>,
    config: &GeneratorConfig,
    workflow_ctx: Option<&WorkflowContext>,
    tag_ctx: Option<&TraceContext>,
    rng: &mut R,
) -> tracepb::Span {
    let span_id: [u8; 8] = rng.random();

    let operation = params.operation.map_or_else(
        || semantic::operation_name(params.service, rng),
        ToString::to_string,
    );

    let duration_ns = sample_duration(params.duration_base_ms, params.duration_variance_ms, rng);
    let end_ns = params.start_ns + duration_ns;

    let kind = params
        .kind_override
        .unwrap_or_else(|| select_span_kind(&config.span_kind_weights, rng));

    let is_error = rng.random::<f64>() < config.error_rate;
    let status = if is_error {
        tracepb::Status {
            code: STATUS_ERROR,
            message: semantic::error_message(rng),
        }
    } else {
        tracepb::Status {
            code: STATUS_OK,
            message: String::new(),
        }
    };

    let mut attributes = vec![
        str_kv("service.name", params.service),
        int_kv("span.depth", i64::from(params.depth)),
    ];
    if config.use_semantic_attributes {
        attributes.extend(semantic::semantic_attributes(kind, params.service, rng));
    }
    if let Some(ctx) = workflow_ctx {
        attributes.extend(semantic::business_attributes(
            ctx,
            params.service,
            config.business_attributes_density,
            rng,
        ));
    }
    if let Some(ctx) = tag_ctx {
        attributes.extend(ctx.propagated_tags(config.tag_density, rng));
    }
    for i in 0..config.attribute_count {
        attributes.push(str_kv(
            &format!("attribute.{i}"),
            &random_hex(config.attribute_value_size * 2, rng),
        ));
    }

    let events = if config.event_count > 0 {
        (0..config.event_count)
            .map(|i| tracepb::span::Event {
                time_unix_nano: params.start_ns
                    + (i as u64) * duration_ns / config.event_count as u64,
                name: format!("event-{i}"),
                attributes: vec![str_kv("event.type", "log")],
                dropped_attributes_count: 0,
            })
            .collect()
    } else {
        Vec::new()
    };

    tracepb::Span {
        trace_id: params.trace_id.to_vec(),
        span_id: span_id.to_vec(),
        parent_span_id: params.parent_span_id.map_or_else(Vec::new, <[u8]>::to_vec),
        name: operation,
        kind: kind.as_proto(),
        start_time_unix_nano: params.start_ns,
        end_time_unix_nano: end_ns,
        status: Some(status),
        attributes,
        events,
        ..Default::default()
    }
}

/// Clamp a child span so it ends at least a millisecond before its parent.
pub(crate) fn clamp_into_parent(span: &mut tracepb::Span, parent_end_ns: u64) {
    let limit = parent_end_ns.saturating_sub(NANOS_PER_MILLI);
    if span.end_time_unix_nano > limit {
        span.end_time_unix_nano = limit.max(span.start_time_unix_nano);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_duration<R: Rng + ?Sized>(base_ms: u64, variance_ms: u64, rng: &mut R) -> u64 {
    let base = if base_ms == 0 { 50.0 } else { base_ms as f64 };
    let normal = Normal::new(0.0, variance_ms as f64).expect("finite variance");
    let millis = (base + normal.sample(rng)).max(1.0) as u64;
    millis.max(1) * NANOS_PER_MILLI
}

/// Weighted span-kind selection; an empty or zero-weight table yields
/// `Server`.
fn select_span_kind<R: Rng + ?Sized>(weights: &BTreeMap<String, f64>, rng: &mut R) -> SpanKind {
    let total: f64 = weights.values().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 {
        return SpanKind::Server;
    }
    let r = rng.random::<f64>() * total;
    let mut acc = 0.0;
    for (name, weight) in weights {
        if !weight.is_finite() || *weight <= 0.0 {
            continue;
        }
        acc += weight;
        if r <= acc {
            return SpanKind::parse(name);
        }
    }
    SpanKind::Server
}
