//! The engine facade.
//!
//! The surface a driving harness binds: client constructors, trace
//! generation, size estimation, throughput planning, and rate-limiter and
//! workload construction. The facade owns the cardinality pool so every
//! generation path shares one registry, and seeded generations can reset it
//! for reproducibility.

use crate::config::{IngestConfig, QueryConfig, RateLimitConfig, WorkloadConfig};
use crate::ingest::IngestClient;
use crate::limit::ByteRateLimiter;
use crate::query::QueryClient;
use crate::workload::QueryWorkload;
use crate::{ingest, query, workload};
use ballast_payload::{
    BatchConfig, CardinalityPool, GeneratorConfig, ThroughputPlan, Trace, estimate,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Errors surfaced by the engine facade.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Trace synthesis or its configuration failed.
    #[error(transparent)]
    Payload(#[from] ballast_payload::Error),
    /// Ingest client construction or use failed.
    #[error(transparent)]
    Ingest(#[from] ingest::Error),
    /// Query client construction or use failed.
    #[error(transparent)]
    Query(#[from] query::Error),
    /// Workload construction or use failed.
    #[error(transparent)]
    Workload(#[from] workload::Error),
}

/// The load-generation and measurement engine.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    pool: Arc<CardinalityPool>,
}

impl Engine {
    /// Create an engine with an empty cardinality pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool backing attribute value generation.
    #[must_use]
    pub fn cardinality_pool(&self) -> &CardinalityPool {
        &self.pool
    }

    /// Build an ingest client for the configured protocol. Transports open
    /// eagerly; unsupported protocol strings are already rejected when the
    /// configuration deserializes.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is invalid or unreachable.
    pub async fn ingest_client(&self, config: &IngestConfig) -> Result<IngestClient, Error> {
        Ok(IngestClient::new(config).await?)
    }

    /// Build a query client.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed or a
    /// configured token file cannot be read.
    pub fn query_client(&self, config: &QueryConfig) -> Result<QueryClient, Error> {
        Ok(QueryClient::new(config)?)
    }

    /// Generate one trace.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn generate_trace(&self, config: &GeneratorConfig) -> Result<Trace, Error> {
        Ok(ballast_payload::generate(config, &self.pool)?)
    }

    /// Generate a batch of traces targeting a serialized size.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn generate_batch(&self, config: &BatchConfig) -> Result<Vec<Trace>, Error> {
        Ok(estimate::generate_batch(config, &self.pool)?)
    }

    /// Estimate the mean serialized size of traces from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn estimate_trace_size(&self, config: &GeneratorConfig) -> Result<usize, Error> {
        Ok(estimate::estimate_size(config, &self.pool)?)
    }

    /// Plan the per-worker trace rate for a byte-throughput target.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn calculate_throughput(
        &self,
        config: &GeneratorConfig,
        target_bytes_per_sec: f64,
        workers: u32,
    ) -> Result<ThroughputPlan, Error> {
        Ok(estimate::plan_throughput(
            config,
            &self.pool,
            target_bytes_per_sec,
            workers,
        )?)
    }

    /// Build a byte rate limiter.
    #[must_use]
    pub fn rate_limiter(&self, config: &RateLimitConfig) -> ByteRateLimiter {
        ByteRateLimiter::new(config.target_mbps, config.burst_multiplier)
    }

    /// Build a query workload over an existing query client. The ingest
    /// test-context labels, when supplied, tag the workload's metric
    /// samples.
    ///
    /// # Errors
    ///
    /// Returns an error when the workload configuration is invalid.
    pub fn query_workload(
        &self,
        client: QueryClient,
        config: WorkloadConfig,
        queries: HashMap<String, crate::config::QueryDefinition>,
        labels: Vec<(String, String)>,
    ) -> Result<QueryWorkload, Error> {
        Ok(QueryWorkload::new(client, config, queries, labels)?)
    }
}
