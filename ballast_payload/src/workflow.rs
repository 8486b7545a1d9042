//! Workflow-driven trace generation.
//!
//! A workflow names a business flow as an ordered list of service steps.
//! One workflow is chosen per trace by weighted draw, its steps are walked
//! as a parent-child chain (steps marked parallel-capable fork the chain),
//! and each step's span carries business attributes drawn from a workflow
//! context resolved once at trace start.

use crate::cardinality::CardinalityPool;
use crate::common::{NANOS_PER_MILLI, ServiceSpan, SpanKind, group_by_service, unix_nanos_now};
use crate::context::TraceContext;
use crate::shape::{SpanParams, build_span, clamp_into_parent};
use crate::{Error, GeneratorConfig, Trace};
use rand::Rng;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// One step of a workflow.
struct Step {
    service: &'static str,
    operation: &'static str,
    kind: SpanKind,
    duration_ms: u64,
    can_parallel: bool,
}

const fn step(
    service: &'static str,
    operation: &'static str,
    kind: SpanKind,
    duration_ms: u64,
    can_parallel: bool,
) -> Step {
    Step {
        service,
        operation,
        kind,
        duration_ms,
        can_parallel,
    }
}

/// Workflow names in declaration order; selection falls back to a uniform
/// draw over this list.
const WORKFLOW_NAMES: &[&str] = &[
    "place_order",
    "user_login",
    "browse_products",
    "search_products",
    "view_dashboard",
    "process_refund",
    "user_registration",
];

#[allow(clippy::too_many_lines)]
fn workflow_steps(name: &str) -> &'static [Step] {
    use SpanKind::{Client, Server};

    const PLACE_ORDER: &[Step] = &[
        step("frontend", "POST /api/orders", Server, 100, true),
        step("auth", "ValidateToken", Server, 20, false),
        step("backend", "ProcessOrder", Server, 150, true),
        step("cache", "GET", Client, 5, false),
        step("database", "SELECT products", Client, 30, false),
        step("payment", "ProcessPayment", Client, 200, false),
        step("database", "INSERT orders", Client, 40, false),
        step("shipping", "CreateShipment", Client, 80, false),
        step("notification", "SendEmail", Client, 50, false),
    ];
    const USER_LOGIN: &[Step] = &[
        step("frontend", "POST /api/auth/login", Server, 80, true),
        step("auth", "Authenticate", Server, 100, true),
        step("cache", "GET", Client, 5, false),
        step("database", "SELECT users", Client, 25, false),
        step("analytics", "TrackEvent", Client, 20, false),
    ];
    const BROWSE_PRODUCTS: &[Step] = &[
        step("frontend", "GET /api/products", Server, 60, true),
        step("cache", "GET", Client, 3, false),
        step("database", "SELECT products", Client, 50, false),
        step("analytics", "TrackEvent", Client, 15, false),
    ];
    const SEARCH_PRODUCTS: &[Step] = &[
        step("frontend", "GET /api/products/search", Server, 70, true),
        step("backend", "SearchProducts", Server, 120, true),
        step("database", "SELECT products", Client, 80, false),
        step("cache", "SET", Client, 5, false),
        step("analytics", "TrackEvent", Client, 15, false),
    ];
    const VIEW_DASHBOARD: &[Step] = &[
        step("frontend", "GET /dashboard", Server, 90, true),
        step("auth", "ValidateToken", Client, 15, false),
        step("backend", "GetDashboardData", Server, 100, true),
        step("database", "SELECT", Client, 40, false),
        step("analytics", "QueryData", Client, 30, false),
    ];
    const PROCESS_REFUND: &[Step] = &[
        step("frontend", "POST /api/refunds", Server, 100, true),
        step("auth", "Authorize", Client, 20, false),
        step("backend", "ProcessRefund", Server, 150, true),
        step("database", "SELECT orders", Client, 30, false),
        step("payment", "Refund", Client, 180, false),
        step("database", "UPDATE orders", Client, 35, false),
        step("notification", "SendEmail", Client, 45, false),
    ];
    const USER_REGISTRATION: &[Step] = &[
        step("frontend", "POST /api/users/register", Server, 90, true),
        step("backend", "ValidateInput", Server, 40, false),
        step("database", "SELECT users", Client, 25, false),
        step("database", "INSERT users", Client, 35, false),
        step("auth", "CreateSession", Client, 30, false),
        step("analytics", "TrackEvent", Client, 15, false),
    ];

    match name {
        "place_order" => PLACE_ORDER,
        "user_login" => USER_LOGIN,
        "browse_products" => BROWSE_PRODUCTS,
        "search_products" => SEARCH_PRODUCTS,
        "view_dashboard" => VIEW_DASHBOARD,
        "process_refund" => PROCESS_REFUND,
        "user_registration" => USER_REGISTRATION,
        _ => &[],
    }
}

/// Business identity values resolved once per workflow trace.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkflowContext {
    pub(crate) user_id: Option<String>,
    pub(crate) order_id: Option<String>,
    pub(crate) product_id: Option<String>,
    pub(crate) session_id: Option<String>,
    pub(crate) payment_id: Option<String>,
    pub(crate) shipment_id: Option<String>,
    pub(crate) request_id: Option<String>,
    pub(crate) correlation_id: Option<String>,
}

/// Select a workflow by weighted draw. Unknown names in the weight table are
/// skipped; an empty or zero-weight table yields a uniform draw.
fn select_workflow<R: Rng + ?Sized>(weights: &BTreeMap<String, f64>, rng: &mut R) -> &'static str {
    let total: f64 = weights
        .iter()
        .filter(|(name, w)| WORKFLOW_NAMES.contains(&name.as_str()) && w.is_finite() && **w > 0.0)
        .map(|(_, w)| *w)
        .sum();
    if total <= 0.0 {
        return WORKFLOW_NAMES[rng.random_range(0..WORKFLOW_NAMES.len())];
    }

    let r = rng.random::<f64>() * total;
    let mut acc = 0.0;
    for (name, weight) in weights {
        if !WORKFLOW_NAMES.contains(&name.as_str()) || !weight.is_finite() || *weight <= 0.0 {
            continue;
        }
        acc += weight;
        if r <= acc {
            return WORKFLOW_NAMES
                .iter()
                .copied()
                .find(|n| *n == name.as_str())
                .expect("name checked against table");
        }
    }
    WORKFLOW_NAMES[0]
}

/// Resolve the workflow context: identifiers every flow carries plus the
/// flow-specific ones.
fn workflow_context<R: Rng + ?Sized>(
    name: &str,
    pool: &CardinalityPool,
    overrides: &FxHashMap<String, u64>,
    rng: &mut R,
) -> WorkflowContext {
    let mut ctx = WorkflowContext {
        user_id: Some(pool.value("customer_id", rng, overrides)),
        session_id: Some(pool.value("session_id", rng, overrides)),
        request_id: Some(pool.value("request_id", rng, overrides)),
        correlation_id: Some(pool.value("correlation_id", rng, overrides)),
        ..Default::default()
    };

    match name {
        "place_order" => {
            ctx.order_id = Some(pool.value("order_id", rng, overrides));
            ctx.payment_id = Some(pool.value("payment_id", rng, overrides));
            ctx.product_id = Some(pool.value("product_id", rng, overrides));
            ctx.shipment_id = Some(pool.value("shipment_id", rng, overrides));
        }
        "process_refund" => {
            ctx.order_id = Some(pool.value("order_id", rng, overrides));
            ctx.payment_id = Some(pool.value("payment_id", rng, overrides));
        }
        "browse_products" | "search_products" => {
            ctx.product_id = Some(pool.value("product_id", rng, overrides));
        }
        _ => {}
    }

    ctx
}

/// Generate a trace by walking a weighted-selected workflow.
///
/// # Errors
///
/// Returns an error when the selected workflow resolves to an empty step
/// list, which indicates a table mismatch rather than user input.
pub(crate) fn generate<R: Rng + ?Sized>(
    config: &GeneratorConfig,
    pool: &CardinalityPool,
    rng: &mut R,
) -> Result<Trace, Error> {
    let name = select_workflow(&config.workflow_weights, rng);
    let steps = workflow_steps(name);
    if steps.is_empty() {
        return Err(Error::Validation(format!("workflow {name:?} has no steps")));
    }

    let workflow_ctx = workflow_context(name, pool, &config.cardinality_config, rng);
    let tag_ctx = if config.enable_tags {
        Some(TraceContext::full(&config.cardinality_config, pool, rng))
    } else {
        None
    };

    let trace_id: [u8; 16] = rng.random();
    let trace_start = unix_nanos_now() - rng.random_range(0..3600) * NANOS_PER_SECOND;

    struct Emitted {
        span: opentelemetry_proto::tonic::trace::v1::Span,
        service: String,
        depth: u32,
    }
    let mut emitted: Vec<Emitted> = Vec::with_capacity(steps.len());

    let root_step = &steps[0];
    let root = build_span(
        &SpanParams {
            trace_id: &trace_id,
            parent_span_id: None,
            depth: 0,
            service: root_step.service,
            operation: Some(root_step.operation),
            start_ns: trace_start,
            duration_base_ms: root_step.duration_ms.max(1),
            duration_variance_ms: config.duration_variance_ms,
            kind_override: Some(root_step.kind),
        },
        config,
        Some(&workflow_ctx),
        tag_ctx.as_ref(),
        rng,
    );
    emitted.push(Emitted {
        span: root,
        service: root_step.service.to_string(),
        depth: 0,
    });

    // Index stack of open parents. A parallel-capable step leaves its parent
    // on the stack so later steps can fork from it; a sequential step
    // replaces the top so the chain advances.
    let mut parent_stack: Vec<usize> = vec![0];

    for step in steps.iter().skip(1) {
        let parent_idx = if parent_stack.len() > 1 && rng.random::<f64>() < 0.3 {
            parent_stack[rng.random_range(0..parent_stack.len())]
        } else {
            *parent_stack.last().expect("stack never empties")
        };

        let (parent_span_id, parent_start, parent_end, parent_depth) = {
            let p = &emitted[parent_idx];
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

        let available_ms = parent_end
            .saturating_sub(child_start)
            .saturating_sub(10 * NANOS_PER_MILLI)
            .max(NANOS_PER_MILLI)
            / NANOS_PER_MILLI;
        let base_ms = step.duration_ms.clamp(1, available_ms.max(1));

        let mut span = build_span(
            &SpanParams {
                trace_id: &trace_id,
                parent_span_id: Some(&parent_span_id),
                depth: parent_depth + 1,
                service: step.service,
                operation: Some(step.operation),
                start_ns: child_start,
                duration_base_ms: base_ms,
                duration_variance_ms: config.duration_variance_ms,
                kind_override: Some(step.kind),
            },
            config,
            Some(&workflow_ctx),
            tag_ctx.as_ref(),
            rng,
        );
        clamp_into_parent(&mut span, parent_end);

        let idx = emitted.len();
        emitted.push(Emitted {
            span,
            service: step.service.to_string(),
            depth: parent_depth + 1,
        });

        if step.can_parallel {
            parent_stack.push(idx);
        } else if let Some(top) = parent_stack.last_mut() {
            *top = idx;
        }
    }

    let extras: Vec<(String, String)> = config
        .resource_attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let spans = emitted
        .into_iter()
        .map(|e| ServiceSpan {
            service: e.service,
            span: e.span,
        })
        .collect();
    Ok(group_by_service(spans, &extras, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn every_named_workflow_has_steps() {
        for name in WORKFLOW_NAMES {
            assert!(!workflow_steps(name).is_empty(), "{name} missing steps");
        }
        assert!(workflow_steps("no_such_flow").is_empty());
    }

    #[test]
    fn weighted_selection_skips_unknown_names() {
        let mut rng = SmallRng::seed_from_u64(31);
        let mut weights = BTreeMap::new();
        weights.insert("not_a_workflow".to_string(), 100.0);
        weights.insert("user_login".to_string(), 1.0);
        for _ in 0..64 {
            assert_eq!(select_workflow(&weights, &mut rng), "user_login");
        }
    }

    #[test]
    fn generates_one_span_per_step() {
        let pool = CardinalityPool::new();
        let mut rng = SmallRng::seed_from_u64(32);
        let mut weights = BTreeMap::new();
        weights.insert("user_login".to_string(), 1.0);
        let config = GeneratorConfig {
            use_workflows: true,
            workflow_weights: weights,
            spans_per_trace: 64,
            enable_tags: false,
            ..GeneratorConfig::default()
        };
        let trace = generate(&config, &pool, &mut rng).expect("generate");
        assert_eq!(trace.span_count(), workflow_steps("user_login").len());
    }

    #[test]
    fn workflow_spans_nest_and_share_the_trace_id() {
        let pool = CardinalityPool::new();
        let mut rng = SmallRng::seed_from_u64(33);
        let mut weights = BTreeMap::new();
        weights.insert("place_order".to_string(), 1.0);
        let config = GeneratorConfig {
            use_workflows: true,
            workflow_weights: weights,
            spans_per_trace: 64,
            enable_tags: false,
            ..GeneratorConfig::default()
        };
        let trace = generate(&config, &pool, &mut rng).expect("generate");
        let spans: Vec<_> = trace.spans().collect();
        let trace_id = &spans[0].trace_id;

        for span in &spans {
            assert_eq!(&span.trace_id, trace_id);
            if span.parent_span_id.is_empty() {
                continue;
            }
            let parent = spans
                .iter()
                .find(|p| p.span_id == span.parent_span_id)
                .expect("parent exists");
            assert!(span.end_time_unix_nano <= parent.end_time_unix_nano);
        }
    }

    #[test]
    fn order_flows_carry_order_context() {
        let pool = CardinalityPool::new();
        let mut rng = SmallRng::seed_from_u64(34);
        let ctx = workflow_context("place_order", &pool, &FxHashMap::default(), &mut rng);
        assert!(ctx.order_id.is_some());
        assert!(ctx.payment_id.is_some());
        assert!(ctx.shipment_id.is_some());
        let ctx = workflow_context("user_login", &pool, &FxHashMap::default(), &mut rng);
        assert!(ctx.order_id.is_none());
    }
}
