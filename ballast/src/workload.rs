//! The query workload controller.
//!
//! Each iteration: acquire a rate-limit token, honor any adaptive backoff,
//! sample a weighted plan entry, resolve its time bucket into a query
//! window, run the search, record metrics, and feed the response status back
//! into the backoff state machine. A successful search is followed, with
//! configured probability, by a fetch of the first returned trace.
//!
//! One workload may be shared by many workers; all mutable state sits
//! behind locks and metric samples are emitted exactly once per call.

use crate::config::{PlanEntry, QueryDefinition, WorkloadConfig};
use crate::query::{QueryClient, ResponseMeta, SearchOptions, SearchResponse};
use crate::{query, telemetry};
use ballast_throttle::{Throttle, burst_for};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod backoff;
use backoff::Backoff;

/// Result limit applied when a query definition leaves it unset.
const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Errors produced by [`QueryWorkload`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The workload configuration is invalid.
    #[error("invalid workload configuration: {0}")]
    Config(String),
    /// The execution plan has no entries.
    #[error("no eligible plan entry found")]
    EmptyPlan,
    /// A plan entry names a query that does not exist.
    #[error("query definition not found: {0}")]
    UnknownQuery(String),
    /// A plan entry names a time bucket that does not exist.
    #[error("time bucket not found: {0}")]
    UnknownBucket(String),
    /// The iteration was cancelled while blocked.
    #[error("workload iteration cancelled")]
    Cancelled,
    /// The rate limiter failed.
    #[error(transparent)]
    Throttle(#[from] ballast_throttle::Error),
    /// The search itself failed.
    #[error(transparent)]
    Query(#[from] query::Error),
}

/// A time bucket with its age bounds parsed at construction.
#[derive(Debug, Clone)]
struct ResolvedBucket {
    name: String,
    age_start: Duration,
    age_end: Duration,
}

/// The per-worker query workload state.
#[derive(Debug)]
pub struct QueryWorkload {
    config: WorkloadConfig,
    client: QueryClient,
    queries: FxHashMap<String, QueryDefinition>,
    buckets: Vec<ResolvedBucket>,
    limiter: tokio::sync::Mutex<Throttle>,
    backoff: Mutex<Backoff>,
    rng: Mutex<SmallRng>,
    plan_cursor: AtomicUsize,
    test_start: Instant,
    labels: Vec<(String, String)>,
    cancel: CancellationToken,
}

impl QueryWorkload {
    /// Build a workload from configuration.
    ///
    /// The rate limiter runs at `target_qps * qps_multiplier` tokens per
    /// second with burst `max(1, ceil(rate * burst_multiplier))`. Bucket age
    /// strings are parsed here; an unparseable duration or an inverted
    /// window is a configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid rates, probabilities, backoff
    /// bounds, or buckets.
    pub fn new(
        client: QueryClient,
        config: WorkloadConfig,
        queries: HashMap<String, QueryDefinition>,
        labels: Vec<(String, String)>,
    ) -> Result<Self, Error> {
        let rate = config.target_qps * config.qps_multiplier;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::Config(format!(
                "targetQPS * qpsMultiplier must be positive, got {rate}"
            )));
        }
        if !config.trace_fetch_probability.is_finite()
            || !(0.0..=1.0).contains(&config.trace_fetch_probability)
        {
            return Err(Error::Config(format!(
                "traceFetchProbability must be in [0.0, 1.0], got {}",
                config.trace_fetch_probability
            )));
        }
        if config.min_backoff_ms > config.max_backoff_ms {
            return Err(Error::Config(format!(
                "minBackoffMs ({}) exceeds maxBackoffMs ({})",
                config.min_backoff_ms, config.max_backoff_ms
            )));
        }

        let mut buckets = Vec::with_capacity(config.time_buckets.len());
        for bucket in &config.time_buckets {
            let age_start = humantime::parse_duration(&bucket.age_start).map_err(|e| {
                Error::Config(format!(
                    "bucket {:?}: invalid ageStart {:?}: {e}",
                    bucket.name, bucket.age_start
                ))
            })?;
            let age_end = humantime::parse_duration(&bucket.age_end).map_err(|e| {
                Error::Config(format!(
                    "bucket {:?}: invalid ageEnd {:?}: {e}",
                    bucket.name, bucket.age_end
                ))
            })?;
            if age_end <= age_start {
                return Err(Error::Config(format!(
                    "bucket {:?}: ageEnd ({}) must exceed ageStart ({})",
                    bucket.name, bucket.age_end, bucket.age_start
                )));
            }
            buckets.push(ResolvedBucket {
                name: bucket.name.clone(),
                age_start,
                age_end,
            });
        }

        let limiter =
            Throttle::new(rate, burst_for(rate, config.burst_multiplier)).map_err(|e| {
                Error::Config(format!("failed to build query rate limiter: {e}"))
            })?;
        let backoff = Backoff::new(
            Duration::from_millis(config.min_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        );

        debug!(
            rate,
            buckets = buckets.len(),
            plan_entries = config.execution_plan.len(),
            "query workload ready"
        );

        Ok(Self {
            config,
            client,
            queries: queries.into_iter().collect(),
            buckets,
            limiter: tokio::sync::Mutex::new(limiter),
            backoff: Mutex::new(backoff),
            rng: Mutex::new(SmallRng::from_os_rng()),
            plan_cursor: AtomicUsize::new(0),
            test_start: Instant::now(),
            labels,
            cancel: CancellationToken::new(),
        })
    }

    /// The token that cancels this workload's blocking waits.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Execute one weighted plan step under rate limit and backoff.
    ///
    /// # Errors
    ///
    /// Missing query or bucket names are per-call errors with no metric
    /// side effects; search failures are returned after metrics and backoff
    /// have been updated; cancellation surfaces promptly from any wait.
    pub async fn execute_next(&self) -> Result<SearchResponse, Error> {
        self.acquire_token().await?;
        self.apply_backoff().await?;

        let entry = self.select_plan_entry()?.clone();
        let query = self
            .queries
            .get(&entry.query_name)
            .ok_or_else(|| Error::UnknownQuery(entry.query_name.clone()))?;
        let bucket = self
            .buckets
            .iter()
            .find(|b| b.name == entry.bucket_name)
            .ok_or_else(|| Error::UnknownBucket(entry.bucket_name.clone()))?;

        let options = self.bucket_window(bucket, self.test_start.elapsed(), query.limit);

        let started = Instant::now();
        let outcome = self.client.search_with_meta(&query.query, &options).await;
        let duration = started.elapsed();

        let (spans, status, success) = match &outcome {
            Ok((response, _)) => (response.traces.len(), None, true),
            Err(e) => (0, e.status(), false),
        };
        telemetry::record_query(
            &self.labels,
            &entry.query_name,
            duration,
            spans,
            status,
            success,
        );
        telemetry::record_time_bucket(&self.labels, &entry.bucket_name, duration);

        let meta = match &outcome {
            Ok((_, meta)) => Some(*meta),
            Err(e) => e.response_meta(),
        };
        self.feed_backoff(meta);

        outcome.map(|(response, _)| response).map_err(Error::from)
    }

    /// Execute one plan step and, with the configured probability, fetch
    /// the first trace the search returned.
    ///
    /// # Errors
    ///
    /// Search errors propagate; fetch failures are recorded as metrics and
    /// swallowed.
    pub async fn execute_search_and_fetch(&self) -> Result<(), Error> {
        let response = self.execute_next().await?;
        if response.traces.is_empty() {
            return Ok(());
        }

        let should_fetch = {
            let mut rng = self.rng.lock().expect("workload rng lock poisoned");
            rng.random::<f64>() < self.config.trace_fetch_probability
        };
        if !should_fetch {
            return Ok(());
        }

        let trace_id = response.traces[0].trace_id.clone();
        let started = Instant::now();
        let outcome = self.client.get_trace_with_meta(&trace_id).await;
        let duration = started.elapsed();

        let meta = match &outcome {
            Ok((_, meta)) => Some(*meta),
            Err(e) => e.response_meta(),
        };
        self.feed_backoff(meta);
        telemetry::record_trace_fetch(&self.labels, duration, outcome.is_ok());

        Ok(())
    }

    /// The current adaptive delay. Zero when the server is healthy.
    #[must_use]
    pub fn backoff_duration(&self) -> Duration {
        self.backoff
            .lock()
            .expect("workload backoff lock poisoned")
            .current()
    }

    async fn acquire_token(&self) -> Result<(), Error> {
        let mut limiter = tokio::select! {
            guard = self.limiter.lock() => guard,
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
        };
        tokio::select! {
            result = limiter.wait() => result?,
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
        }
        Ok(())
    }

    async fn apply_backoff(&self) -> Result<(), Error> {
        if !self.config.enable_backoff {
            return Ok(());
        }
        let delay = self.backoff_duration();
        if delay.is_zero() {
            return Ok(());
        }

        let delay = if self.config.backoff_jitter {
            let jitter_ms = u64::try_from(delay.as_millis() / 10).unwrap_or(0);
            if jitter_ms > 0 {
                let mut rng = self.rng.lock().expect("workload rng lock poisoned");
                delay + Duration::from_millis(rng.random_range(0..jitter_ms))
            } else {
                delay
            }
        } else {
            delay
        };

        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Weighted plan sampling. Non-positive weights count as 1.0; if the
    /// coerced total is somehow not positive the plan is cycled in order.
    fn select_plan_entry(&self) -> Result<&PlanEntry, Error> {
        let plan = &self.config.execution_plan;
        if plan.is_empty() {
            return Err(Error::EmptyPlan);
        }

        fn coerce(weight: f64) -> f64 {
            if weight.is_finite() && weight > 0.0 {
                weight
            } else {
                1.0
            }
        }

        let total: f64 = plan.iter().map(|e| coerce(e.weight)).sum();
        if !total.is_finite() || total <= 0.0 {
            let idx = self.plan_cursor.fetch_add(1, Ordering::Relaxed) % plan.len();
            return Ok(&plan[idx]);
        }

        let r = {
            let mut rng = self.rng.lock().expect("workload rng lock poisoned");
            rng.random::<f64>() * total
        };
        let mut acc = 0.0;
        for entry in plan {
            acc += coerce(entry.weight);
            if r <= acc {
                return Ok(entry);
            }
        }
        Ok(&plan[0])
    }

    /// Resolve a bucket into search options for the current moment.
    ///
    /// A bucket is eligible once the test has run longer than its far edge;
    /// until then the default window of the last hour applies. Window
    /// jitter shifts both edges by one shared offset so the window slides
    /// rather than stretches.
    #[allow(clippy::cast_possible_wrap)]
    fn bucket_window(
        &self,
        bucket: &ResolvedBucket,
        elapsed: Duration,
        limit: usize,
    ) -> SearchOptions {
        let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };

        if elapsed < bucket.age_end {
            return SearchOptions {
                start: "1h".to_string(),
                end: "now".to_string(),
                limit,
            };
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        let mut start = now - bucket.age_end.as_nanos() as i64;
        let mut end = now - bucket.age_start.as_nanos() as i64;

        if self.config.time_window_jitter_ms > 0 {
            let jitter = self.config.time_window_jitter_ms as i64;
            let offset_ms = {
                let mut rng = self.rng.lock().expect("workload rng lock poisoned");
                rng.random_range(-jitter..=jitter)
            };
            let offset = offset_ms * 1_000_000;
            start += offset;
            end += offset;
        }

        SearchOptions {
            start: start.to_string(),
            end: end.to_string(),
            limit,
        }
    }

    fn feed_backoff(&self, meta: Option<ResponseMeta>) {
        if !self.config.enable_backoff {
            return;
        }
        let grew = {
            let mut backoff = self.backoff.lock().expect("workload backoff lock poisoned");
            match meta {
                Some(meta) => backoff.on_response(meta.status, meta.retry_after_seconds),
                None => {
                    backoff.on_transport_error();
                    None
                }
            }
        };
        if let Some(delta) = grew {
            telemetry::record_backoff(&self.labels, delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueryConfig, TimeBucketConfig};

    fn client() -> QueryClient {
        QueryClient::new(&QueryConfig {
            endpoint: "http://localhost:3200".to_string(),
            ..QueryConfig::default()
        })
        .expect("client")
    }

    fn workload_with(config: WorkloadConfig) -> QueryWorkload {
        let mut queries = HashMap::new();
        queries.insert(
            "default".to_string(),
            QueryDefinition {
                query: "{}".to_string(),
                limit: 0,
                options: serde_json::Map::new(),
            },
        );
        QueryWorkload::new(client(), config, queries, Vec::new()).expect("workload")
    }

    #[tokio::test]
    async fn invalid_bucket_duration_is_a_config_error() {
        let config = WorkloadConfig {
            time_buckets: vec![TimeBucketConfig {
                name: "bad".to_string(),
                age_start: "not-a-duration".to_string(),
                age_end: "1h".to_string(),
                weight: 1.0,
            }],
            ..WorkloadConfig::default()
        };
        let result = QueryWorkload::new(client(), config, HashMap::new(), Vec::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn inverted_bucket_window_is_a_config_error() {
        let config = WorkloadConfig {
            time_buckets: vec![TimeBucketConfig {
                name: "inverted".to_string(),
                age_start: "2h".to_string(),
                age_end: "1h".to_string(),
                weight: 1.0,
            }],
            ..WorkloadConfig::default()
        };
        let result = QueryWorkload::new(client(), config, HashMap::new(), Vec::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn ineligible_bucket_falls_back_to_the_default_window() {
        let config = WorkloadConfig {
            time_buckets: vec![TimeBucketConfig {
                name: "aged".to_string(),
                age_start: "1h".to_string(),
                age_end: "6h".to_string(),
                weight: 1.0,
            }],
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);
        let bucket = &workload.buckets[0];

        // Two hours in: elapsed < ageEnd, not yet eligible.
        let options = workload.bucket_window(bucket, Duration::from_secs(2 * 3600), 0);
        assert_eq!(options.start, "1h");
        assert_eq!(options.end, "now");
        assert_eq!(options.limit, DEFAULT_SEARCH_LIMIT);
    }

    #[tokio::test]
    async fn eligible_bucket_uses_its_age_window() {
        let config = WorkloadConfig {
            time_buckets: vec![TimeBucketConfig {
                name: "aged".to_string(),
                age_start: "1h".to_string(),
                age_end: "6h".to_string(),
                weight: 1.0,
            }],
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);
        let bucket = workload.buckets[0].clone();

        // Seven hours in: eligible, window is [now - 6h, now - 1h].
        let options = workload.bucket_window(&bucket, Duration::from_secs(7 * 3600), 15);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("epoch")
            .as_nanos() as i64;
        let start: i64 = options.start.parse().expect("start is nanos");
        let end: i64 = options.end.parse().expect("end is nanos");
        let hour = 3_600_000_000_000_i64;

        assert!((now - 6 * hour - start).abs() < hour / 100);
        assert!((now - hour - end).abs() < hour / 100);
        assert_eq!(options.limit, 15);
    }

    #[tokio::test]
    async fn window_jitter_shifts_without_stretching() {
        let config = WorkloadConfig {
            time_window_jitter_ms: 5000,
            time_buckets: vec![TimeBucketConfig {
                name: "aged".to_string(),
                age_start: "1h".to_string(),
                age_end: "2h".to_string(),
                weight: 1.0,
            }],
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);
        let bucket = workload.buckets[0].clone();

        for _ in 0..32 {
            let options = workload.bucket_window(&bucket, Duration::from_secs(3 * 3600), 0);
            let start: i64 = options.start.parse().expect("start");
            let end: i64 = options.end.parse().expect("end");
            // The window's width never changes; only its position does.
            assert_eq!(end - start, 3_600_000_000_000);
        }
    }

    #[tokio::test]
    async fn plan_selection_honors_weights() {
        let config = WorkloadConfig {
            execution_plan: vec![
                PlanEntry {
                    query_name: "heavy".to_string(),
                    bucket_name: "recent".to_string(),
                    weight: 9.0,
                },
                PlanEntry {
                    query_name: "light".to_string(),
                    bucket_name: "recent".to_string(),
                    weight: 1.0,
                },
            ],
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);

        let mut heavy = 0_u32;
        const ROUNDS: u32 = 4000;
        for _ in 0..ROUNDS {
            let entry = workload.select_plan_entry().expect("entry");
            if entry.query_name == "heavy" {
                heavy += 1;
            }
        }
        let frequency = f64::from(heavy) / f64::from(ROUNDS);
        assert!(
            (frequency - 0.9).abs() < 0.05,
            "heavy frequency {frequency}"
        );
    }

    #[tokio::test]
    async fn non_positive_weights_are_coerced_to_one() {
        let config = WorkloadConfig {
            execution_plan: vec![
                PlanEntry {
                    query_name: "a".to_string(),
                    bucket_name: "recent".to_string(),
                    weight: 0.0,
                },
                PlanEntry {
                    query_name: "b".to_string(),
                    bucket_name: "recent".to_string(),
                    weight: -3.0,
                },
            ],
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);

        let mut first = 0_u32;
        const ROUNDS: u32 = 4000;
        for _ in 0..ROUNDS {
            if workload.select_plan_entry().expect("entry").query_name == "a" {
                first += 1;
            }
        }
        let frequency = f64::from(first) / f64::from(ROUNDS);
        assert!((frequency - 0.5).abs() < 0.05, "frequency {frequency}");
    }

    #[tokio::test]
    async fn empty_plan_is_an_error() {
        let config = WorkloadConfig {
            execution_plan: Vec::new(),
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);
        assert!(matches!(
            workload.select_plan_entry(),
            Err(Error::EmptyPlan)
        ));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_token_wait() {
        // One query per hour: the second token would take an hour to refill.
        let config = WorkloadConfig {
            target_qps: 1.0 / 3600.0,
            burst_multiplier: 1.0,
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);
        workload.acquire_token().await.expect("initial token");
        workload.cancellation_token().cancel();
        let result = workload.acquire_token().await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn missing_query_name_is_a_per_call_error() {
        let config = WorkloadConfig {
            execution_plan: vec![PlanEntry {
                query_name: "missing".to_string(),
                bucket_name: "recent".to_string(),
                weight: 1.0,
            }],
            ..WorkloadConfig::default()
        };
        let workload = workload_with(config);
        let result = workload.execute_next().await;
        assert!(matches!(result, Err(Error::UnknownQuery(name)) if name == "missing"));
    }
}
