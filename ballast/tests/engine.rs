//! End-to-end exercises of the engine facade, driven the way a harness
//! would drive it: untyped JSON configuration in, operations out.

use ballast::Engine;
use ballast::config::{QueryConfig, RateLimitConfig, WorkloadConfig};
use ballast::workload;
use ballast_payload::GeneratorConfig;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

fn tree_config_json(seed: u64) -> String {
    format!(
        r#"{{
            "useTraceTree": true,
            "traceTree": {{
                "seed": {seed},
                "defaults": {{"useSemanticAttributes": false, "enableTags": false, "tagDensity": 0.0}},
                "root": {{
                    "service": "frontend",
                    "operation": "POST /api/orders",
                    "spanKind": "server",
                    "duration": {{"baseMs": 200, "varianceMs": 0}},
                    "errorRate": 0.0,
                    "children": [
                        {{
                            "weight": 1.0,
                            "parallel": false,
                            "node": {{
                                "service": "auth",
                                "operation": "ValidateToken",
                                "duration": {{"baseMs": 25, "varianceMs": 0}},
                                "errorRate": 0.0
                            }}
                        }}
                    ]
                }}
            }}
        }}"#
    )
}

#[test]
fn seeded_tree_config_from_json_is_deterministic() {
    let engine = Engine::new();
    let config: GeneratorConfig =
        serde_json::from_str(&tree_config_json(12_345)).expect("config deserializes");

    let first = engine.generate_trace(&config).expect("generate");
    assert_eq!(first.span_count(), 2);

    let second = engine.generate_trace(&config).expect("generate");
    assert_eq!(first.encode_to_vec(), second.encode_to_vec());

    // The root span runs exactly its configured duration and the child nests
    // strictly inside it.
    let spans: Vec<_> = first.spans().collect();
    let root = spans
        .iter()
        .find(|s| s.parent_span_id.is_empty())
        .expect("root span");
    assert_eq!(
        root.end_time_unix_nano - root.start_time_unix_nano,
        200_000_000
    );
    let child = spans
        .iter()
        .find(|s| !s.parent_span_id.is_empty())
        .expect("child span");
    assert!(root.start_time_unix_nano <= child.start_time_unix_nano);
    assert!(child.end_time_unix_nano < root.end_time_unix_nano);
}

#[test]
fn double_generation_mode_is_rejected() {
    let engine = Engine::new();
    let config: GeneratorConfig = serde_json::from_str(
        r#"{"useWorkflows": true, "useTraceTree": true, "traceTree": {"root": {"service": "a"}}}"#,
    )
    .expect("config deserializes");
    assert!(engine.generate_trace(&config).is_err());
}

#[test]
fn throughput_plan_reconstructs_its_target() {
    let engine = Engine::new();
    let config: GeneratorConfig =
        serde_json::from_str(r#"{"spansPerTrace": 5, "attributeCount": 2}"#).expect("config");

    let target = 2_000_000.0;
    let workers = 10;
    let plan = engine
        .calculate_throughput(&config, target, workers)
        .expect("plan");

    let reconstructed =
        plan.traces_per_worker_per_sec * f64::from(workers) * plan.avg_trace_size_bytes as f64;
    assert!((reconstructed - target).abs() <= plan.avg_trace_size_bytes as f64);
}

#[tokio::test]
async fn rate_limiter_cancellation_is_prompt() {
    let engine = Engine::new();
    let limiter = engine.rate_limiter(&RateLimitConfig {
        target_mbps: 1.0,
        burst_multiplier: 1.5,
    });

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = limiter.wait(512 * 1024 * 1024, &cancel).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn workload_surfaces_missing_queries_without_side_effects() {
    let engine = Engine::new();
    let client = engine
        .query_client(&QueryConfig {
            endpoint: "http://localhost:3200".to_string(),
            ..QueryConfig::default()
        })
        .expect("client");

    let config: WorkloadConfig = serde_json::from_str(
        r#"{
            "targetQPS": 50.0,
            "executionPlan": [{"queryName": "errors", "bucketName": "recent", "weight": 1.0}]
        }"#,
    )
    .expect("workload config");

    let workload_handle = engine
        .query_workload(client, config, HashMap::new(), Vec::new())
        .expect("workload");

    // The plan names a query that was never registered: a per-call error,
    // surfaced before any network traffic happens.
    let result = workload_handle.execute_next().await;
    assert!(matches!(
        result,
        Err(workload::Error::UnknownQuery(name)) if name == "errors"
    ));
}
