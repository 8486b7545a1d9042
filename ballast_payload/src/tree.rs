//! Tree-driven trace generation.
//!
//! Users declare a trace shape as a tree of service/operation nodes with
//! weighted edges and the generator materializes spans that walk it. Child
//! spans always nest inside their parent's interval, sequential children
//! advance a cursor while parallel children may overlap, and a seeded
//! configuration replays byte-identically.

use crate::cardinality::CardinalityPool;
use crate::common::{
    NANOS_PER_MILLI, ServiceSpan, SpanKind, group_by_service, str_kv, unix_nanos_now,
};
use crate::context::{ContextConfig, TraceContext};
use crate::{Error, Trace, semantic};
use opentelemetry_proto::tonic::trace::v1 as tracepb;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NANOS_PER_SECOND: u64 = 1_000_000_000;
const NANOS_PER_HOUR: u64 = 3600 * NANOS_PER_SECOND;

/// Child spans end at least this far before their parent when room allows.
const CHILD_END_MARGIN: u64 = 10 * NANOS_PER_MILLI;
/// The hard nesting bound: a child always ends at least this far before its
/// parent, however small the parent interval is.
const CHILD_END_CLAMP: u64 = NANOS_PER_MILLI;

const STATUS_OK: i32 = 1;
const STATUS_ERROR: i32 = 2;

/// Duration parameters for one node: a base and a normally-distributed
/// variance, both in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DurationConfig {
    /// Mean duration in milliseconds. Zero falls back to 50.
    #[serde(default, deserialize_with = "crate::flex::u64")]
    pub base_ms: u64,
    /// Standard deviation in milliseconds.
    #[serde(default, deserialize_with = "crate::flex::u64")]
    pub variance_ms: u64,
}

/// Repeat bounds for a selected edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CountConfig {
    /// Minimum repeats.
    #[serde(default, deserialize_with = "crate::flex::u32")]
    pub min: u32,
    /// Maximum repeats. Zero means a single emission.
    #[serde(default, deserialize_with = "crate::flex::u32")]
    pub max: u32,
}

/// One node of the trace tree.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TreeNode {
    /// Service name, becomes the `service.name` attribute and the resource
    /// group this node's spans land in.
    pub service: String,
    /// Span name.
    #[serde(default)]
    pub operation: String,
    /// Span kind; defaults to `server`.
    #[serde(default)]
    pub span_kind: SpanKind,
    /// Static tags stamped onto every span from this node. Kept ordered so
    /// seeded generations replay identically.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Duration parameters.
    #[serde(default)]
    pub duration: DurationConfig,
    /// Probability in \[0.0, 1.0\] that this node's span has error status.
    #[serde(default)]
    pub error_rate: f64,
    /// When true, an error on this node promotes the parent's status to
    /// error as well.
    #[serde(default)]
    pub error_propagates: bool,
    /// Outgoing edges.
    #[serde(default)]
    pub children: Vec<TreeEdge>,
}

/// A weighted edge to a child node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TreeEdge {
    /// Selection weight. Zero means equiprobable fallback when every sibling
    /// is also zero, and never-selected otherwise.
    #[serde(default)]
    pub weight: f64,
    /// Parallel children may overlap; sequential children run one after
    /// another.
    #[serde(default)]
    pub parallel: bool,
    /// Repeat bounds when the edge is selected.
    #[serde(default)]
    pub count: CountConfig,
    /// The child node.
    pub node: TreeNode,
}

/// Default toggles applied to every node.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TreeDefaults {
    /// Emit OTel semantic-convention attributes.
    #[serde(default = "default_true")]
    pub use_semantic_attributes: bool,
    /// Emit propagated context tags.
    #[serde(default = "default_true")]
    pub enable_tags: bool,
    /// Base emission probability for propagated tags.
    #[serde(default = "default_tag_density")]
    pub tag_density: f64,
}

fn default_true() -> bool {
    true
}

fn default_tag_density() -> f64 {
    0.9
}

impl Default for TreeDefaults {
    fn default() -> Self {
        Self {
            use_semantic_attributes: true,
            enable_tags: true,
            tag_density: default_tag_density(),
        }
    }
}

/// Complete tree configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TreeConfig {
    /// Seed for reproducibility. Zero selects a nondeterministic source.
    #[serde(default, deserialize_with = "crate::flex::u64")]
    pub seed: u64,
    /// Propagated context configuration.
    #[serde(default)]
    pub context: ContextConfig,
    /// Default toggles.
    #[serde(default)]
    pub defaults: TreeDefaults,
    /// The root node.
    pub root: TreeNode,
}

impl TreeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        validate_node(&self.root, "root")
    }
}

fn validate_node(node: &TreeNode, path: &str) -> Result<(), Error> {
    if node.service.is_empty() {
        return Err(Error::Validation(format!("{path}: service is required")));
    }
    if !node.error_rate.is_finite() || !(0.0..=1.0).contains(&node.error_rate) {
        return Err(Error::Validation(format!(
            "{path}: errorRate must be in [0.0, 1.0], got {}",
            node.error_rate
        )));
    }
    for (i, edge) in node.children.iter().enumerate() {
        let edge_path = format!("{path}.children[{i}]");
        if !edge.weight.is_finite() || edge.weight < 0.0 {
            return Err(Error::Validation(format!(
                "{edge_path}: weight must be finite and non-negative, got {}",
                edge.weight
            )));
        }
        if edge.count.max > 0 && edge.count.min > edge.count.max {
            return Err(Error::Validation(format!(
                "{edge_path}: count.min ({}) exceeds count.max ({})",
                edge.count.min, edge.count.max
            )));
        }
        validate_node(&edge.node, &edge_path)?;
    }
    Ok(())
}

/// Normalize edge weights.
///
/// When every weight is zero the edges become equiprobable. Otherwise each
/// positive weight is divided by the sum of positive weights; zero weights
/// stay zero and are never selected.
pub(crate) fn normalize_weights(edges: &[TreeEdge]) -> Vec<f64> {
    let total: f64 = edges.iter().map(|e| e.weight.max(0.0)).sum();
    if total <= 0.0 {
        let equal = 1.0 / edges.len() as f64;
        return vec![equal; edges.len()];
    }
    edges
        .iter()
        .map(|e| if e.weight > 0.0 { e.weight / total } else { 0.0 })
        .collect()
}

/// Select edges by independent Bernoulli draws against normalized weights,
/// expanding each selected edge by its repeat count. Declaration order is
/// preserved.
fn select_edges<'a, R: Rng + ?Sized>(
    edges: &'a [TreeEdge],
    weights: &[f64],
    rng: &mut R,
) -> Vec<&'a TreeEdge> {
    let mut selected = Vec::new();
    for (edge, weight) in edges.iter().zip(weights) {
        if rng.random::<f64>() < *weight {
            let count = if edge.count.max == 0 {
                1
            } else if edge.count.min < edge.count.max {
                rng.random_range(edge.count.min..=edge.count.max).max(1)
            } else {
                edge.count.min.max(1)
            };
            for _ in 0..count {
                selected.push(edge);
            }
        }
    }
    selected
}

/// Generate a trace from a tree configuration.
///
/// When `seed` is nonzero the cardinality pool is cleared and the random
/// source is seeded, making the output a pure function of the configuration.
///
/// # Errors
///
/// Returns an error when the configuration fails validation.
pub fn generate(config: &TreeConfig, pool: &CardinalityPool) -> Result<Trace, Error> {
    config.validate()?;

    let mut rng = if config.seed == 0 {
        StdRng::from_os_rng()
    } else {
        pool.reset();
        StdRng::seed_from_u64(config.seed)
    };

    let ctx = TraceContext::resolve(&config.context, pool, &mut rng);

    let trace_id: [u8; 16] = rng.random();

    // Trace start lands uniformly within the last hour. Seeded runs anchor to
    // the containing hour so back-to-back generations replay identically.
    let now = unix_nanos_now();
    let anchor = if config.seed == 0 {
        now
    } else {
        now - now % NANOS_PER_HOUR
    };
    let trace_start = anchor - rng.random_range(0..3600) * NANOS_PER_SECOND;

    let mut spans: Vec<ServiceSpan> = Vec::with_capacity(16);
    emit_node(
        &config.root,
        None,
        trace_start,
        &trace_id,
        &mut rng,
        &config.defaults,
        &ctx,
        &mut spans,
    );

    Ok(group_by_service(spans, &[], &mut rng))
}

struct Parent {
    span_id: Vec<u8>,
    start_ns: u64,
    end_ns: u64,
}

struct Emitted {
    end_ns: u64,
    is_error: bool,
}

#[allow(clippy::too_many_arguments, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn emit_node<R: Rng + ?Sized>(
    node: &TreeNode,
    parent: Option<&Parent>,
    base_start_ns: u64,
    trace_id: &[u8; 16],
    rng: &mut R,
    defaults: &TreeDefaults,
    ctx: &TraceContext,
    spans: &mut Vec<ServiceSpan>,
) -> Emitted {
    let duration_ns = sample_duration(node.duration, rng);

    let (start_ns, end_ns) = match parent {
        None => (base_start_ns, base_start_ns + duration_ns),
        Some(p) => {
            let parent_duration = p.end_ns - p.start_ns;
            let delay = (rng.random::<f64>() * 0.3 * parent_duration as f64) as u64;
            let hard_end = p.end_ns.saturating_sub(CHILD_END_CLAMP).max(p.start_ns);
            let start = (base_start_ns + delay).clamp(p.start_ns, hard_end);
            let soft_cap = p.end_ns.saturating_sub(CHILD_END_MARGIN);
            let mut end = start + duration_ns;
            if end > soft_cap {
                // Clamp to the margin; keep at least a millisecond when the
                // parent interval has room for one.
                end = soft_cap.max(start + NANOS_PER_MILLI);
            }
            end = end.clamp(start, hard_end);
            (start, end)
        }
    };

    let is_error = rng.random::<f64>() < node.error_rate;
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

    let span_id: [u8; 8] = rng.random();

    let mut attributes = vec![str_kv("service.name", &node.service)];
    for (key, value) in &node.tags {
        attributes.push(str_kv(key, value));
    }
    if defaults.use_semantic_attributes {
        attributes.extend(semantic::semantic_attributes(node.span_kind, &node.service, rng));
    }
    if defaults.enable_tags {
        attributes.extend(ctx.propagated_tags(defaults.tag_density, rng));
    }

    let span = tracepb::Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id.to_vec(),
        parent_span_id: parent.map_or_else(Vec::new, |p| p.span_id.clone()),
        name: node.operation.clone(),
        kind: node.span_kind.as_proto(),
        start_time_unix_nano: start_ns,
        end_time_unix_nano: end_ns,
        status: Some(status),
        attributes,
        ..Default::default()
    };

    let index = spans.len();
    spans.push(ServiceSpan {
        service: node.service.clone(),
        span,
    });

    if !node.children.is_empty() {
        let weights = normalize_weights(&node.children);
        let selected = select_edges(&node.children, &weights, rng);

        let this = Parent {
            span_id: span_id.to_vec(),
            start_ns,
            end_ns,
        };

        let mut child_error_propagated = false;

        // Sequential children first; the cursor advances to each child's end.
        let mut cursor = start_ns;
        for edge in selected.iter().filter(|e| !e.parallel) {
            let child = emit_node(
                &edge.node,
                Some(&this),
                cursor,
                trace_id,
                rng,
                defaults,
                ctx,
                spans,
            );
            cursor = cursor.max(child.end_ns);
            if child.is_error && edge.node.error_propagates {
                child_error_propagated = true;
            }
        }

        // Parallel children may overlap, each starting with a jittered offset
        // into the remaining parent interval.
        for edge in selected.iter().filter(|e| e.parallel) {
            let available = end_ns.saturating_sub(cursor);
            if available == 0 {
                continue;
            }
            let jitter = (rng.random::<f64>() * 0.2 * available as f64) as u64;
            let child = emit_node(
                &edge.node,
                Some(&this),
                cursor + jitter,
                trace_id,
                rng,
                defaults,
                ctx,
                spans,
            );
            if child.is_error && edge.node.error_propagates {
                child_error_propagated = true;
            }
        }

        if child_error_propagated {
            let status = spans[index]
                .span
                .status
                .get_or_insert_with(tracepb::Status::default);
            status.code = STATUS_ERROR;
            if status.message.is_empty() {
                status.message = "child span failed".to_string();
            }
        }
    }

    let is_error = spans[index]
        .span
        .status
        .as_ref()
        .is_some_and(|s| s.code == STATUS_ERROR);

    Emitted { end_ns, is_error }
}

/// Duration in nanoseconds: `max(1 ms, base + normal(0, variance^2))`,
/// truncated to whole milliseconds.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_duration<R: Rng + ?Sized>(config: DurationConfig, rng: &mut R) -> u64 {
    let base = if config.base_ms == 0 {
        50.0
    } else {
        config.base_ms as f64
    };
    let normal = Normal::new(0.0, config.variance_ms as f64).expect("finite variance");
    let millis = (base + normal.sample(rng)).max(1.0) as u64;
    millis.max(1) * NANOS_PER_MILLI
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf(service: &str, operation: &str, base_ms: u64) -> TreeNode {
        TreeNode {
            service: service.to_string(),
            operation: operation.to_string(),
            duration: DurationConfig {
                base_ms,
                variance_ms: 0,
            },
            ..Default::default()
        }
    }

    fn deterministic_config(seed: u64) -> TreeConfig {
        TreeConfig {
            seed,
            context: ContextConfig::default(),
            defaults: TreeDefaults {
                use_semantic_attributes: false,
                enable_tags: false,
                tag_density: 0.0,
            },
            root: TreeNode {
                children: vec![TreeEdge {
                    weight: 1.0,
                    parallel: false,
                    count: CountConfig::default(),
                    node: leaf("auth", "ValidateToken", 25),
                }],
                ..leaf("frontend", "POST /api/orders", 200)
            },
        }
    }

    #[test]
    fn two_spans_with_exact_root_duration() {
        let pool = CardinalityPool::new();
        let config = deterministic_config(12_345);
        let trace = generate(&config, &pool).expect("generate");

        assert_eq!(trace.span_count(), 2);
        let spans: Vec<_> = trace.spans().collect();
        let root = spans
            .iter()
            .find(|s| s.parent_span_id.is_empty())
            .expect("root span");
        assert_eq!(
            root.end_time_unix_nano - root.start_time_unix_nano,
            200 * NANOS_PER_MILLI
        );
        let child = spans
            .iter()
            .find(|s| !s.parent_span_id.is_empty())
            .expect("child span");
        assert_eq!(child.parent_span_id, root.span_id);
        assert!(root.start_time_unix_nano <= child.start_time_unix_nano);
        assert!(child.end_time_unix_nano < root.end_time_unix_nano);
        for span in &spans {
            assert_eq!(span.status.as_ref().expect("status").code, STATUS_OK);
            assert_eq!(span.trace_id.len(), 16);
        }
    }

    #[test]
    fn seeded_generation_is_byte_identical() {
        let pool = CardinalityPool::new();
        let config = TreeConfig {
            defaults: TreeDefaults::default(),
            context: ContextConfig {
                propagate: vec!["region".into(), "user_id".into()],
                cardinality: rustc_hash::FxHashMap::default(),
            },
            ..deterministic_config(99)
        };
        let first = generate(&config, &pool).expect("generate").encode_to_vec();
        let second = generate(&config, &pool).expect("generate").encode_to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_weights_normalize_to_equal_shares() {
        let edges = vec![
            TreeEdge {
                weight: 0.0,
                parallel: false,
                count: CountConfig::default(),
                node: leaf("a", "op", 10),
            },
            TreeEdge {
                weight: 0.0,
                parallel: false,
                count: CountConfig::default(),
                node: leaf("b", "op", 10),
            },
        ];
        let weights = normalize_weights(&edges);
        assert!((weights[0] - 0.5).abs() < f64::EPSILON);
        assert!((weights[1] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn defined_weights_keep_ratio_and_zero_stays_zero() {
        let edges = vec![
            TreeEdge {
                weight: 0.4,
                parallel: false,
                count: CountConfig::default(),
                node: leaf("a", "op", 10),
            },
            TreeEdge {
                weight: 0.6,
                parallel: false,
                count: CountConfig::default(),
                node: leaf("b", "op", 10),
            },
            TreeEdge {
                weight: 0.0,
                parallel: false,
                count: CountConfig::default(),
                node: leaf("c", "op", 10),
            },
        ];
        let weights = normalize_weights(&edges);
        assert!((weights[0] - 0.4).abs() < 1e-9);
        assert!((weights[1] - 0.6).abs() < 1e-9);
        assert!(weights[2].abs() < f64::EPSILON);
    }

    #[test]
    fn error_propagates_from_sequential_child() {
        let pool = CardinalityPool::new();
        let config = TreeConfig {
            seed: 7,
            context: ContextConfig::default(),
            defaults: TreeDefaults {
                use_semantic_attributes: false,
                enable_tags: false,
                tag_density: 0.0,
            },
            root: TreeNode {
                children: vec![TreeEdge {
                    weight: 1.0,
                    parallel: false,
                    count: CountConfig::default(),
                    node: TreeNode {
                        error_rate: 1.0,
                        error_propagates: true,
                        ..leaf("auth", "ValidateToken", 25)
                    },
                }],
                ..leaf("frontend", "POST /api/orders", 200)
            },
        };
        let trace = generate(&config, &pool).expect("generate");
        let spans: Vec<_> = trace.spans().collect();
        let root = spans
            .iter()
            .find(|s| s.parent_span_id.is_empty())
            .expect("root span");
        let status = root.status.as_ref().expect("status");
        assert_eq!(status.code, STATUS_ERROR);
        assert_eq!(status.message, "child span failed");
    }

    #[test]
    fn validation_rejects_out_of_range_error_rate() {
        let mut config = deterministic_config(1);
        config.root.error_rate = 1.5;
        assert!(matches!(
            generate(&config, &CardinalityPool::new()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn repeat_counts_expand_edges() {
        let pool = CardinalityPool::new();
        let config = TreeConfig {
            seed: 5,
            context: ContextConfig::default(),
            defaults: TreeDefaults {
                use_semantic_attributes: false,
                enable_tags: false,
                tag_density: 0.0,
            },
            root: TreeNode {
                children: vec![TreeEdge {
                    weight: 1.0,
                    parallel: false,
                    count: CountConfig { min: 3, max: 3 },
                    node: leaf("cache", "GET", 5),
                }],
                ..leaf("frontend", "GET /api/products", 300)
            },
        };
        let trace = generate(&config, &pool).expect("generate");
        assert_eq!(trace.span_count(), 4);
    }

    proptest! {
        // Nesting invariant: every child starts no earlier than its parent
        // and ends at least a millisecond before it.
        #[test]
        fn children_nest_within_parents(
            seed in 1u64..u64::MAX,
            root_ms in 20u64..2_000,
            child_ms in 1u64..2_000,
            variance in 0u64..200,
            parallel in any::<bool>(),
        ) {
            let pool = CardinalityPool::new();
            let config = TreeConfig {
                seed,
                context: ContextConfig::default(),
                defaults: TreeDefaults {
                    use_semantic_attributes: false,
                    enable_tags: false,
                    tag_density: 0.0,
                },
                root: TreeNode {
                    children: vec![
                        TreeEdge {
                            weight: 1.0,
                            parallel,
                            count: CountConfig { min: 1, max: 3 },
                            node: TreeNode {
                                duration: DurationConfig { base_ms: child_ms, variance_ms: variance },
                                ..leaf("auth", "ValidateToken", child_ms)
                            },
                        },
                    ],
                    ..leaf("frontend", "POST /api/orders", root_ms)
                },
            };
            let trace = generate(&config, &pool).expect("generate");
            let spans: Vec<_> = trace.spans().collect();
            let root = spans.iter().find(|s| s.parent_span_id.is_empty()).expect("root");
            for span in spans.iter().filter(|s| !s.parent_span_id.is_empty()) {
                prop_assert!(root.start_time_unix_nano <= span.start_time_unix_nano);
                prop_assert!(
                    span.end_time_unix_nano + NANOS_PER_MILLI <= root.end_time_unix_nano,
                    "child end {} too close to parent end {}",
                    span.end_time_unix_nano,
                    root.end_time_unix_nano
                );
            }
        }

        // Equal-weight edges are selected with frequency tending to 1/n.
        #[test]
        fn equiprobable_selection_frequency(seed in 1u64..u64::MAX) {
            use rand::rngs::SmallRng;
            let edges: Vec<TreeEdge> = (0..4)
                .map(|i| TreeEdge {
                    weight: 0.0,
                    parallel: false,
                    count: CountConfig::default(),
                    node: leaf(&format!("svc-{i}"), "op", 10),
                })
                .collect();
            let weights = normalize_weights(&edges);
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut hits = [0u32; 4];
            const ROUNDS: u32 = 4000;
            for _ in 0..ROUNDS {
                for selected in select_edges(&edges, &weights, &mut rng) {
                    let idx = edges
                        .iter()
                        .position(|e| std::ptr::eq(e, selected))
                        .expect("selected edge is from the input");
                    hits[idx] += 1;
                }
            }
            // Each edge fires independently with probability 1/4.
            for count in hits {
                let frequency = f64::from(count) / f64::from(ROUNDS);
                prop_assert!((frequency - 0.25).abs() < 0.05, "frequency {frequency}");
            }
        }
    }
}
