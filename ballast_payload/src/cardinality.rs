//! Bounded-cardinality attribute value pools.
//!
//! Attribute names map to finite pools of values so that generated traces
//! exhibit realistic, controllable label cardinality. Pools are materialized
//! lazily the first time a name is drawn at a given target and are immutable
//! once published. A target of zero means unique-per-draw: values are
//! generated fresh and never cached.

use crate::common::{random_hex, random_lowercase};
use rand::Rng;
use rustc_hash::FxHashMap;
use std::sync::{Arc, RwLock};

/// Medium cardinality, the default for names without an entry in the
/// defaults table.
const DEFAULT_CARDINALITY: u64 = 50;

/// A thread-safe registry of attribute-name value pools.
///
/// Reads are the common path and take the read lock only; the write lock is
/// taken when a pool must be materialized or extended to reach a requested
/// cardinality.
#[derive(Debug, Default)]
pub struct CardinalityPool {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pools: FxHashMap<String, Arc<Vec<String>>>,
    counts: FxHashMap<String, usize>,
}

impl CardinalityPool {
    /// Create an empty pool registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default target cardinality for an attribute name. Zero means
    /// unique per draw.
    #[must_use]
    pub fn default_cardinality(name: &str) -> u64 {
        match name {
            // Low cardinality
            "region" => 8,
            "datacenter" => 6,
            "environment" | "deployment.environment" | "priority" => 3,
            "http.method" => 5,
            "canary" => 2,
            "user_tier" | "version" => 4,
            // Medium cardinality
            "http.status_code" => 10,
            "error_type" => 15,
            "availability_zone" | "tenant_id" | "org_id" => 50,
            "cluster" => 75,
            "git_commit" => 100,
            "feature_flags" => 20,
            // High cardinality
            "customer_id" => 5000,
            "pod_name" | "k8s.pod.name" => 2000,
            "host.name" => 1000,
            // Unique per draw
            "trace_id" | "span_id" | "order_id" | "request_id" | "correlation_id"
            | "payment_id" | "shipment_id" | "session_id" | "product_id" => 0,
            _ => DEFAULT_CARDINALITY,
        }
    }

    /// Draw a value for `name` honoring the target cardinality.
    ///
    /// The target comes from `overrides` when present, else from the defaults
    /// table. A target of zero produces a fresh unique value each call.
    pub fn value<R: Rng + ?Sized>(
        &self,
        name: &str,
        rng: &mut R,
        overrides: &FxHashMap<String, u64>,
    ) -> String {
        let target = overrides
            .get(name)
            .copied()
            .unwrap_or_else(|| Self::default_cardinality(name));

        if target == 0 {
            return unique_value(name, rng);
        }
        let target = usize::try_from(target).unwrap_or(usize::MAX);

        {
            let inner = self.inner.read().expect("cardinality pool lock poisoned");
            if let Some(pool) = inner.pools.get(name) {
                if pool.len() >= target {
                    return pool[rng.random_range(0..pool.len())].clone();
                }
            }
        }

        let mut inner = self.inner.write().expect("cardinality pool lock poisoned");
        let needs_pool = inner.pools.get(name).is_none_or(|p| p.len() < target);
        if needs_pool {
            let pool = Arc::new(value_pool(name, target, rng));
            inner.counts.insert(name.to_string(), pool.len());
            inner.pools.insert(name.to_string(), pool);
        }
        let pool = &inner.pools[name];
        pool[rng.random_range(0..pool.len())].clone()
    }

    /// The number of distinct values currently materialized for `name`.
    #[must_use]
    pub fn distinct_count(&self, name: &str) -> usize {
        self.inner
            .read()
            .expect("cardinality pool lock poisoned")
            .counts
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Materialized distinct counts for every name drawn so far.
    #[must_use]
    pub fn stats(&self) -> FxHashMap<String, usize> {
        self.inner
            .read()
            .expect("cardinality pool lock poisoned")
            .counts
            .clone()
    }

    /// Clear every pool. Called when a seeded generation starts so that value
    /// draws replay identically.
    pub fn reset(&self) {
        let mut inner = self.inner.write().expect("cardinality pool lock poisoned");
        inner.pools.clear();
        inner.counts.clear();
    }
}

/// Build the value pool for a known attribute name, falling back to
/// `name-<i>` for names without a template.
fn value_pool<R: Rng + ?Sized>(name: &str, size: usize, rng: &mut R) -> Vec<String> {
    fn from_base(base: &[&str], size: usize, fallback: impl Fn(usize) -> String) -> Vec<String> {
        (0..size)
            .map(|i| base.get(i).map_or_else(|| fallback(i), |v| (*v).to_string()))
            .collect()
    }

    match name {
        "region" => from_base(
            &[
                "us-east-1",
                "us-west-2",
                "eu-west-1",
                "ap-southeast-1",
                "sa-east-1",
                "eu-central-1",
                "ap-northeast-1",
                "us-central-1",
            ],
            size,
            |i| format!("region-{i}"),
        ),
        "datacenter" => (0..size).map(|i| format!("dc-{:02}", i + 1)).collect(),
        "environment" | "deployment.environment" => from_base(
            &["production", "staging", "development"],
            size,
            |i| format!("env-{i}"),
        ),
        "http.method" => from_base(&["GET", "POST", "PUT", "DELETE", "PATCH"], size, |i| {
            format!("METHOD-{i}")
        }),
        "http.status_code" => {
            const CODES: &[u32] = &[
                200, 201, 204, 301, 302, 400, 401, 403, 404, 500, 502, 503, 504,
            ];
            (0..size)
                .map(|i| {
                    CODES
                        .get(i)
                        .map_or_else(|| format!("{}", 200 + i), ToString::to_string)
                })
                .collect()
        }
        "availability_zone" => (0..size).map(|i| format!("az-{:02}", i + 1)).collect(),
        "cluster" => (0..size).map(|i| format!("cluster-{:03}", i + 1)).collect(),
        "tenant_id" => (0..size).map(|i| format!("tenant-{:04}", i + 1)).collect(),
        "org_id" => (0..size).map(|i| format!("org-{:04}", i + 1)).collect(),
        "customer_id" => (0..size).map(|i| format!("customer-{:06}", i + 1)).collect(),
        "pod_name" | "k8s.pod.name" => (0..size)
            .map(|i| format!("pod-{}-{:05}", random_lowercase(5, rng), i + 1))
            .collect(),
        "host.name" => (0..size).map(|i| format!("host-{:05}", i + 1)).collect(),
        "version" => from_base(&["1.0.0", "1.1.0", "1.2.0", "2.0.0"], size, |i| {
            format!("1.{i}.0")
        }),
        "git_commit" => (0..size).map(|_| random_hex(7, rng)).collect(),
        "canary" => from_base(&["true", "false"], size, |_| "false".to_string()),
        "user_tier" => from_base(&["free", "basic", "premium", "enterprise"], size, |i| {
            format!("tier-{i}")
        }),
        "priority" => from_base(&["low", "medium", "high", "critical"], size, |i| {
            format!("priority-{i}")
        }),
        "feature_flags" => (0..size).map(|i| format!("feature-{:03}", i + 1)).collect(),
        "error_type" => from_base(
            &[
                "timeout",
                "connection_error",
                "validation_error",
                "auth_error",
                "not_found",
                "rate_limit",
                "server_error",
            ],
            size,
            |i| format!("error-{i}"),
        ),
        _ => (0..size).map(|i| format!("{name}-{}", i + 1)).collect(),
    }
}

/// A fresh value for a unique-per-draw attribute name.
fn unique_value<R: Rng + ?Sized>(name: &str, rng: &mut R) -> String {
    match name {
        "trace_id" | "span_id" | "request_id" | "correlation_id" => random_hex(16, rng),
        "order_id" | "payment_id" | "shipment_id" => {
            let prefix = name.strip_suffix("_id").unwrap_or(name);
            format!("{prefix}-{}", random_hex(12, rng))
        }
        "product_id" => format!("product-{:06}", rng.random_range(1..=10_000)),
        "session_id" => random_hex(24, rng),
        _ => random_hex(16, rng),
    }
}
