//! Trace synthesis for the ballast project.
//!
//! This library produces OpenTelemetry OTLP traces on demand: from aggregate
//! shape parameters, from a declarative tree description, or from named
//! business workflows. It also estimates serialized trace sizes and plans
//! per-worker throughput for a byte-rate target.

#![deny(clippy::cargo)]
#![deny(clippy::all)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1 as tracepb;
use prost::Message;
use rand::{SeedableRng, rngs::StdRng};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod cardinality;
mod common;
pub mod context;
pub mod estimate;
pub mod flex;
mod semantic;
mod shape;
pub mod tree;
mod workflow;

pub use cardinality::CardinalityPool;
pub use common::SpanKind;
pub use estimate::{BatchConfig, ThroughputPlan, estimate_size, generate_batch, plan_throughput};

/// Errors produced by trace synthesis.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration is structurally invalid.
    #[error("invalid configuration: {0}")]
    Validation(String),
    /// Protobuf encoding failed.
    #[error(transparent)]
    ProstEncode(#[from] prost::EncodeError),
}

/// A generated trace: one resource group per service, each holding the
/// service's spans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    resource_spans: Vec<tracepb::ResourceSpans>,
}

impl Trace {
    pub(crate) fn from_resource_spans(resource_spans: Vec<tracepb::ResourceSpans>) -> Self {
        Self { resource_spans }
    }

    /// The resource groups of this trace.
    #[must_use]
    pub fn resource_groups(&self) -> &[tracepb::ResourceSpans] {
        &self.resource_spans
    }

    /// Total span count across all resource groups.
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.spans().count()
    }

    /// Iterate every span in the trace.
    pub fn spans(&self) -> impl Iterator<Item = &tracepb::Span> {
        self.resource_spans
            .iter()
            .flat_map(|rs| rs.scope_spans.iter())
            .flat_map(|ss| ss.spans.iter())
    }

    /// Build the OTLP export request for this trace, borrowing nothing.
    #[must_use]
    pub fn to_export_request(&self) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: self.resource_spans.clone(),
        }
    }

    /// Consume the trace into its OTLP export request.
    #[must_use]
    pub fn into_export_request(self) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: self.resource_spans,
        }
    }

    /// Merge many traces into one export request by concatenating their
    /// resource groups, the batch form both exporters send.
    pub fn merge<I: IntoIterator<Item = Trace>>(traces: I) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: traces
                .into_iter()
                .flat_map(|t| t.resource_spans)
                .collect(),
        }
    }

    /// The exact canonical protobuf size of this trace's export request.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.to_export_request().encoded_len()
    }

    /// Serialize this trace's export request to bytes.
    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.to_export_request().encode_to_vec()
    }
}

/// The generation path a configuration resolves to.
#[derive(Debug, Clone, Copy)]
pub enum GenerationMode<'a> {
    /// Shape-parameter driven generation.
    Shape,
    /// Tree-description driven generation.
    Tree(&'a tree::TreeConfig),
    /// Named-workflow driven generation.
    Workflow,
}

/// Configuration for trace generation.
///
/// The tree and workflow paths are mutually exclusive; [`GeneratorConfig::mode`]
/// is the single validation point that rejects double selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct GeneratorConfig {
    /// Number of distinct services spans rotate through.
    #[serde(deserialize_with = "flex::usize")]
    pub services: usize,
    /// Maximum span tree depth.
    #[serde(deserialize_with = "flex::u32")]
    pub span_depth: u32,
    /// Total spans per trace.
    #[serde(deserialize_with = "flex::usize")]
    pub spans_per_trace: usize,
    /// Synthetic padding attributes per span.
    #[serde(deserialize_with = "flex::usize")]
    pub attribute_count: usize,
    /// Byte length of each padding attribute value.
    #[serde(deserialize_with = "flex::usize")]
    pub attribute_value_size: usize,
    /// Events per span.
    #[serde(deserialize_with = "flex::usize")]
    pub event_count: usize,
    /// Extra resource-level attributes applied to every resource group.
    pub resource_attributes: BTreeMap<String, String>,
    /// Mean span duration in milliseconds.
    #[serde(deserialize_with = "flex::u64")]
    pub duration_base_ms: u64,
    /// Standard deviation of span duration in milliseconds.
    #[serde(deserialize_with = "flex::u64")]
    pub duration_variance_ms: u64,
    /// Probability in \[0.0, 1.0\] of error status per span.
    pub error_rate: f64,
    /// Span-kind selection weights, e.g. `{"server": 0.4, "client": 0.4}`.
    pub span_kind_weights: BTreeMap<String, f64>,
    /// Maximum children per span.
    #[serde(deserialize_with = "flex::u32")]
    pub max_fan_out: u32,
    /// Fan-out perturbation in \[0.0, 1.0\].
    pub fan_out_variance: f64,
    /// Emit OTel semantic-convention attributes.
    pub use_semantic_attributes: bool,
    /// Enable the workflow generation path.
    pub use_workflows: bool,
    /// Workflow selection weights by name.
    pub workflow_weights: BTreeMap<String, f64>,
    /// Emission probability for business attributes in workflow mode.
    pub business_attributes_density: f64,
    /// Attribute-name → target-cardinality overrides.
    #[serde(deserialize_with = "flex::u64_map")]
    pub cardinality_config: FxHashMap<String, u64>,
    /// Emit propagated context tags.
    pub enable_tags: bool,
    /// Base emission probability for propagated tags.
    pub tag_density: f64,
    /// Enable the tree generation path.
    pub use_trace_tree: bool,
    /// Tree description, required when `use_trace_tree` is set.
    pub trace_tree: Option<tree::TreeConfig>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let mut span_kind_weights = BTreeMap::new();
        span_kind_weights.insert("server".to_string(), 0.35);
        span_kind_weights.insert("client".to_string(), 0.35);
        span_kind_weights.insert("internal".to_string(), 0.20);
        span_kind_weights.insert("producer".to_string(), 0.05);
        span_kind_weights.insert("consumer".to_string(), 0.05);

        Self {
            services: 3,
            span_depth: 4,
            spans_per_trace: 10,
            attribute_count: 5,
            attribute_value_size: 32,
            event_count: 0,
            resource_attributes: BTreeMap::new(),
            duration_base_ms: 50,
            duration_variance_ms: 30,
            error_rate: 0.02,
            span_kind_weights,
            max_fan_out: 5,
            fan_out_variance: 0.5,
            use_semantic_attributes: true,
            use_workflows: false,
            workflow_weights: BTreeMap::new(),
            business_attributes_density: 0.8,
            cardinality_config: FxHashMap::default(),
            enable_tags: false,
            tag_density: 0.9,
            use_trace_tree: false,
            trace_tree: None,
        }
    }
}

impl GeneratorConfig {
    /// Resolve and validate the generation mode.
    ///
    /// # Errors
    ///
    /// Returns an error when both generation paths are selected, when the
    /// tree path is selected without a tree, or when a probability field is
    /// out of range.
    pub fn mode(&self) -> Result<GenerationMode<'_>, Error> {
        for (name, value) in [
            ("errorRate", self.error_rate),
            ("fanOutVariance", self.fan_out_variance),
            ("businessAttributesDensity", self.business_attributes_density),
            ("tagDensity", self.tag_density),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(Error::Validation(format!(
                    "{name} must be in [0.0, 1.0], got {value}"
                )));
            }
        }

        match (self.use_trace_tree, self.use_workflows) {
            (true, true) => Err(Error::Validation(
                "useTraceTree and useWorkflows are mutually exclusive".to_string(),
            )),
            (true, false) => {
                let tree = self.trace_tree.as_ref().ok_or_else(|| {
                    Error::Validation("useTraceTree requires a traceTree description".to_string())
                })?;
                tree.validate()?;
                Ok(GenerationMode::Tree(tree))
            }
            (false, true) => Ok(GenerationMode::Workflow),
            (false, false) => Ok(GenerationMode::Shape),
        }
    }
}

/// Generate one trace according to the configuration's generation mode.
///
/// # Errors
///
/// Returns an error when the configuration fails validation.
pub fn generate(config: &GeneratorConfig, pool: &CardinalityPool) -> Result<Trace, Error> {
    match config.mode()? {
        GenerationMode::Tree(tree_config) => tree::generate(tree_config, pool),
        GenerationMode::Workflow => {
            let mut rng = StdRng::from_os_rng();
            workflow::generate(config, pool, &mut rng)
        }
        GenerationMode::Shape => {
            let mut rng = StdRng::from_os_rng();
            shape::generate(config, pool, &mut rng)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_and_workflow_paths_are_mutually_exclusive() {
        let config = GeneratorConfig {
            use_trace_tree: true,
            use_workflows: true,
            ..GeneratorConfig::default()
        };
        assert!(matches!(config.mode(), Err(Error::Validation(_))));
    }

    #[test]
    fn tree_path_requires_a_tree() {
        let config = GeneratorConfig {
            use_trace_tree: true,
            ..GeneratorConfig::default()
        };
        assert!(matches!(config.mode(), Err(Error::Validation(_))));
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let config = GeneratorConfig {
            error_rate: 1.2,
            ..GeneratorConfig::default()
        };
        assert!(matches!(config.mode(), Err(Error::Validation(_))));
    }

    #[test]
    fn config_accepts_flexible_integers_from_json() {
        let config: GeneratorConfig = serde_json::from_str(
            r#"{
                "services": "4",
                "spansPerTrace": 12.0,
                "durationBaseMs": 75,
                "cardinalityConfig": {"region": "3"}
            }"#,
        )
        .expect("deserialize");
        assert_eq!(config.services, 4);
        assert_eq!(config.spans_per_trace, 12);
        assert_eq!(config.duration_base_ms, 75);
        assert_eq!(config.cardinality_config["region"], 3);
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let result = serde_json::from_str::<GeneratorConfig>(r#"{"notAKey": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn generated_trace_survives_the_wire_round_trip() {
        use prost::Message;
        let pool = CardinalityPool::new();
        let config = GeneratorConfig {
            spans_per_trace: 6,
            ..GeneratorConfig::default()
        };
        let trace = generate(&config, &pool).expect("generate");
        let bytes = trace.encode_to_vec();
        let decoded = ExportTraceServiceRequest::decode(bytes.as_slice()).expect("decode");

        let decoded_spans: usize = decoded
            .resource_spans
            .iter()
            .flat_map(|rs| rs.scope_spans.iter())
            .map(|ss| ss.spans.len())
            .sum();
        assert_eq!(decoded_spans, trace.span_count());

        let mut original: Vec<_> = trace
            .spans()
            .map(|s| (s.name.clone(), s.kind, s.status.clone().map(|st| st.code)))
            .collect();
        let mut round_tripped: Vec<_> = decoded
            .resource_spans
            .iter()
            .flat_map(|rs| rs.scope_spans.iter())
            .flat_map(|ss| ss.spans.iter())
            .map(|s| (s.name.clone(), s.kind, s.status.clone().map(|st| st.code)))
            .collect();
        original.sort();
        round_tripped.sort();
        assert_eq!(original, round_tripped);
    }

    #[test]
    fn merge_concatenates_resource_groups() {
        let pool = CardinalityPool::new();
        let config = GeneratorConfig {
            spans_per_trace: 3,
            ..GeneratorConfig::default()
        };
        let a = generate(&config, &pool).expect("generate");
        let b = generate(&config, &pool).expect("generate");
        let groups = a.resource_groups().len() + b.resource_groups().len();
        let merged = Trace::merge([a, b]);
        assert_eq!(merged.resource_spans.len(), groups);
    }
}
