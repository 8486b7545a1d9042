//! Size estimation, throughput planning, and size-targeted batches.
//!
//! Estimation generates sample traces and measures their canonical OTLP
//! protobuf encoding, so the result reflects every probabilistic knob of the
//! configuration rather than a per-span guess.

use crate::cardinality::CardinalityPool;
use crate::{Error, GenerationMode, GeneratorConfig, Trace, flex, shape, tree, workflow};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sample count for the shape and workflow paths.
const SAMPLES: usize = 50;
/// Sample count for the tree path, each sample seeded as `base_seed + i`.
const TREE_SAMPLES: usize = 40;

/// Fallback average size when estimation yields zero bytes.
const FALLBACK_TRACE_BYTES: usize = 1000;
/// Fallback throughput target when the caller passes a non-positive one.
const FALLBACK_BYTES_PER_SEC: f64 = 1024.0 * 1024.0;

/// Estimate the mean serialized size of traces produced by `config`.
///
/// Tree configurations sample with predictable seeds derived from the
/// configured seed so estimation does not perturb reproducibility; the other
/// paths sample from a fresh random source. Samples that fail to generate
/// are skipped; if every sample fails the estimate is zero.
///
/// # Errors
///
/// Returns an error when the configuration fails validation.
pub fn estimate_size(config: &GeneratorConfig, pool: &CardinalityPool) -> Result<usize, Error> {
    let mode = config.mode()?;

    let mut total = 0_usize;
    let mut successes = 0_usize;

    match mode {
        GenerationMode::Tree(tree_config) => {
            let base_seed = if tree_config.seed == 0 {
                1
            } else {
                tree_config.seed
            };
            for i in 0..TREE_SAMPLES {
                let mut sample = tree_config.clone();
                sample.seed = base_seed.wrapping_add(i as u64);
                match tree::generate(&sample, pool) {
                    Ok(trace) => {
                        total += trace.encoded_len();
                        successes += 1;
                    }
                    Err(_) => continue,
                }
            }
        }
        GenerationMode::Shape | GenerationMode::Workflow => {
            let mut rng = StdRng::from_os_rng();
            for _ in 0..SAMPLES {
                let generated = match mode {
                    GenerationMode::Workflow => workflow::generate(config, pool, &mut rng),
                    _ => shape::generate(config, pool, &mut rng),
                };
                match generated {
                    Ok(trace) => {
                        total += trace.encoded_len();
                        successes += 1;
                    }
                    Err(_) => continue,
                }
            }
        }
    }

    if successes == 0 {
        debug!("every estimation sample failed to serialize");
        return Ok(0);
    }
    debug!(successes, avg_bytes = total / successes, "size estimation complete");
    Ok(total / successes)
}

/// The output of [`plan_throughput`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputPlan {
    /// The byte-per-second target the plan satisfies.
    pub target_bytes_per_sec: f64,
    /// Mean serialized trace size used for the computation.
    pub avg_trace_size_bytes: usize,
    /// Traces each worker must emit per second.
    pub traces_per_worker_per_sec: f64,
    /// Aggregate traces per second across all workers.
    pub total_traces_per_sec: f64,
}

/// Compute the per-worker trace rate required to hit a byte throughput.
///
/// A non-positive `target_bytes_per_sec` falls back to 1 MiB/s and a zero
/// size estimate falls back to 1000 bytes, so the plan is always actionable.
///
/// # Errors
///
/// Returns an error when the configuration fails validation.
pub fn plan_throughput(
    config: &GeneratorConfig,
    pool: &CardinalityPool,
    target_bytes_per_sec: f64,
    workers: u32,
) -> Result<ThroughputPlan, Error> {
    let target = if target_bytes_per_sec.is_finite() && target_bytes_per_sec > 0.0 {
        target_bytes_per_sec
    } else {
        FALLBACK_BYTES_PER_SEC
    };

    let mut avg_size = estimate_size(config, pool)?;
    if avg_size == 0 {
        avg_size = FALLBACK_TRACE_BYTES;
    }

    let workers = workers.max(1);
    let traces_per_worker = target / (avg_size as f64 * f64::from(workers));
    Ok(ThroughputPlan {
        target_bytes_per_sec: target,
        avg_trace_size_bytes: avg_size,
        traces_per_worker_per_sec: traces_per_worker,
        total_traces_per_sec: traces_per_worker * f64::from(workers),
    })
}

/// Configuration for size-targeted batch generation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BatchConfig {
    /// Total serialized bytes the batch should approach without exceeding.
    #[serde(deserialize_with = "flex::usize")]
    pub target_size_bytes: usize,
    /// Configuration for the individual traces.
    #[serde(default)]
    pub trace_config: GeneratorConfig,
}

/// Upper bound on traces per batch, a runaway guard rather than a tuning
/// knob.
const BATCH_TRACE_LIMIT: usize = 10_000;

/// Generate traces until their summed serialized size approaches the target.
///
/// # Errors
///
/// Returns an error when the target is zero or the trace configuration fails
/// validation.
pub fn generate_batch(config: &BatchConfig, pool: &CardinalityPool) -> Result<Vec<Trace>, Error> {
    if config.target_size_bytes == 0 {
        return Err(Error::Validation(
            "targetSizeBytes is required and must be positive".to_string(),
        ));
    }

    let mut traces = Vec::new();
    let mut current = 0_usize;
    while current < config.target_size_bytes && traces.len() < BATCH_TRACE_LIMIT {
        let trace = crate::generate(&config.trace_config, pool)?;
        let size = trace.encoded_len();
        if current + size > config.target_size_bytes && !traces.is_empty() {
            break;
        }
        current += size;
        traces.push(trace);
    }
    Ok(traces)
}
