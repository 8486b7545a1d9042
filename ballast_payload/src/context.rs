//! Per-trace identity context.
//!
//! A trace context is a read-only snapshot of identity values (user id,
//! tenant, region, correlation id, ...) chosen once at trace start from the
//! cardinality pool and stamped onto every span of that trace. Each
//! propagation key names a cardinality-pool key; emission onto spans is
//! sampled by a per-key density multiplier so not every span carries every
//! tag.

use crate::cardinality::CardinalityPool;
use crate::common::str_kv;
use crate::flex;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

const DENSITY_FULL: f64 = 1.0;
const DENSITY_HIGH: f64 = 0.8;
const DENSITY_MEDIUM_HIGH: f64 = 0.7;
const DENSITY_MEDIUM: f64 = 0.6;
const DENSITY_MEDIUM_LOW: f64 = 0.5;
const DENSITY_VERY_LOW: f64 = 0.3;

/// Fallback tag density when the caller leaves it unset or non-positive.
const DEFAULT_TAG_DENSITY: f64 = 0.9;

/// Context block of a tree configuration: which keys to propagate and any
/// cardinality overrides for the pools backing them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Propagation keys resolved at trace start.
    #[serde(default)]
    pub propagate: Vec<String>,
    /// Attribute-name → target-cardinality overrides.
    #[serde(default, deserialize_with = "flex::u64_map")]
    pub cardinality: FxHashMap<String, u64>,
}

/// A propagation key: how it is named in configuration, which pool supplies
/// its values, what attribute it lands on, and how often it is emitted
/// relative to the configured tag density.
struct PropagationKey {
    name: &'static str,
    pool: &'static str,
    attribute: &'static str,
    density: f64,
}

const PROPAGATION_KEYS: &[PropagationKey] = &[
    PropagationKey { name: "region", pool: "region", attribute: "infrastructure.region", density: DENSITY_FULL },
    PropagationKey { name: "datacenter", pool: "datacenter", attribute: "infrastructure.datacenter", density: DENSITY_FULL },
    PropagationKey { name: "availability_zone", pool: "availability_zone", attribute: "infrastructure.availability_zone", density: DENSITY_FULL },
    PropagationKey { name: "cluster", pool: "cluster", attribute: "infrastructure.cluster", density: DENSITY_FULL },
    PropagationKey { name: "tenant_id", pool: "tenant_id", attribute: "tenant.id", density: DENSITY_FULL },
    PropagationKey { name: "customer_id", pool: "customer_id", attribute: "tenant.customer_id", density: DENSITY_MEDIUM_HIGH },
    PropagationKey { name: "org_id", pool: "org_id", attribute: "tenant.org_id", density: DENSITY_FULL },
    PropagationKey { name: "version", pool: "version", attribute: "deployment.version", density: DENSITY_FULL },
    PropagationKey { name: "git_commit", pool: "git_commit", attribute: "deployment.git_commit", density: DENSITY_HIGH },
    PropagationKey { name: "canary", pool: "canary", attribute: "deployment.canary", density: DENSITY_VERY_LOW },
    PropagationKey { name: "request_id", pool: "request_id", attribute: "request.id", density: DENSITY_FULL },
    PropagationKey { name: "correlation_id", pool: "correlation_id", attribute: "request.correlation_id", density: DENSITY_HIGH },
    PropagationKey { name: "user_tier", pool: "user_tier", attribute: "request.user_tier", density: DENSITY_FULL },
    PropagationKey { name: "priority", pool: "priority", attribute: "request.priority", density: DENSITY_MEDIUM_LOW },
    PropagationKey { name: "user_id", pool: "customer_id", attribute: "user.id", density: DENSITY_FULL },
    PropagationKey { name: "order_id", pool: "order_id", attribute: "order.id", density: DENSITY_FULL },
    PropagationKey { name: "session_id", pool: "session_id", attribute: "session.id", density: DENSITY_HIGH },
    PropagationKey { name: "payment_id", pool: "payment_id", attribute: "payment.id", density: DENSITY_FULL },
    PropagationKey { name: "shipment_id", pool: "shipment_id", attribute: "shipment.id", density: DENSITY_FULL },
    PropagationKey { name: "product_id", pool: "product_id", attribute: "product.id", density: DENSITY_FULL },
];

/// A read-only snapshot of identity values for one trace.
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    /// Resolved (key index, value) pairs in declaration order.
    values: Vec<(usize, String)>,
    /// Feature flags, populated only by [`TraceContext::full`].
    feature_flags: Vec<String>,
}

impl TraceContext {
    /// Resolve the keys listed in `config.propagate` against the pool.
    /// Unknown key names are skipped.
    pub fn resolve<R: Rng + ?Sized>(
        config: &ContextConfig,
        pool: &CardinalityPool,
        rng: &mut R,
    ) -> Self {
        let mut values = Vec::with_capacity(config.propagate.len());
        for requested in &config.propagate {
            if let Some(idx) = PROPAGATION_KEYS.iter().position(|k| k.name == requested) {
                let value = pool.value(PROPAGATION_KEYS[idx].pool, rng, &config.cardinality);
                values.push((idx, value));
            }
        }
        Self {
            values,
            feature_flags: Vec::new(),
        }
    }

    /// Resolve every propagation key plus one to three feature flags. Used by
    /// the shape and workflow paths where the full tag surface applies.
    pub fn full<R: Rng + ?Sized>(
        overrides: &FxHashMap<String, u64>,
        pool: &CardinalityPool,
        rng: &mut R,
    ) -> Self {
        let mut values = Vec::with_capacity(PROPAGATION_KEYS.len());
        for (idx, key) in PROPAGATION_KEYS.iter().enumerate() {
            values.push((idx, pool.value(key.pool, rng, overrides)));
        }
        let flag_count = rng.random_range(1..=3);
        let feature_flags = (0..flag_count)
            .map(|_| pool.value("feature_flags", rng, overrides))
            .collect();
        Self {
            values,
            feature_flags,
        }
    }

    /// The resolved value for a propagation key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(idx, _)| PROPAGATION_KEYS[*idx].name == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sample the propagated tags for one span.
    ///
    /// `density` is the base emission probability; each key further scales it
    /// by its own multiplier. Non-positive density falls back to 0.9 and
    /// values above 1.0 are clamped.
    pub fn propagated_tags<R: Rng + ?Sized>(&self, density: f64, rng: &mut R) -> Vec<KeyValue> {
        let density = if density <= 0.0 {
            DEFAULT_TAG_DENSITY
        } else {
            density.min(1.0)
        };

        let mut tags = Vec::new();
        for (idx, value) in &self.values {
            let key = &PROPAGATION_KEYS[*idx];
            if !value.is_empty() && rng.random::<f64>() < density * key.density {
                tags.push(str_kv(key.attribute, value));
            }
        }
        if !self.feature_flags.is_empty() && rng.random::<f64>() < density * DENSITY_MEDIUM {
            for flag in &self.feature_flags {
                tags.push(str_kv("deployment.feature_flag", flag));
            }
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn resolve_skips_unknown_keys() {
        let pool = CardinalityPool::new();
        let mut rng = SmallRng::seed_from_u64(3);
        let config = ContextConfig {
            propagate: vec!["region".into(), "no_such_key".into(), "tenant_id".into()],
            cardinality: FxHashMap::default(),
        };
        let ctx = TraceContext::resolve(&config, &pool, &mut rng);
        assert!(ctx.get("region").is_some());
        assert!(ctx.get("tenant_id").is_some());
        assert!(ctx.get("no_such_key").is_none());
    }

    #[test]
    fn values_are_stable_within_a_context() {
        let pool = CardinalityPool::new();
        let mut rng = SmallRng::seed_from_u64(3);
        let config = ContextConfig {
            propagate: vec!["user_id".into()],
            cardinality: FxHashMap::default(),
        };
        let ctx = TraceContext::resolve(&config, &pool, &mut rng);
        let first = ctx.get("user_id").expect("resolved").to_string();
        // Tag emission draws randomness but never re-resolves the value.
        for _ in 0..16 {
            let tags = ctx.propagated_tags(1.0, &mut rng);
            for tag in tags {
                if tag.key == "user.id" {
                    let value = tag.value.and_then(|v| v.value);
                    if let Some(
                        opentelemetry_proto::tonic::common::v1::any_value::Value::StringValue(s),
                    ) = value
                    {
                        assert_eq!(s, first);
                    }
                }
            }
        }
    }

    #[test]
    fn full_density_emits_every_full_density_key() {
        let pool = CardinalityPool::new();
        let mut rng = SmallRng::seed_from_u64(9);
        let config = ContextConfig {
            propagate: vec!["region".into(), "request_id".into()],
            cardinality: FxHashMap::default(),
        };
        let ctx = TraceContext::resolve(&config, &pool, &mut rng);
        let tags = ctx.propagated_tags(1.0, &mut rng);
        let keys: Vec<&str> = tags.iter().map(|t| t.key.as_str()).collect();
        assert!(keys.contains(&"infrastructure.region"));
        assert!(keys.contains(&"request.id"));
    }
}
