//! The ballast throttle mechanism
//!
//! This library supports throttling for the rest of the ballast project. The
//! throttle is a continuous-refill token bucket: capacity accumulates at a
//! fixed rate up to a burst ceiling and callers draw it down, waiting when
//! their request cannot be satisfied immediately.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use tokio::time::{self, Duration, Instant};

// A 'tick' is one microsecond. The throttle makes no claim on the unit of its
// tokens; callers decide whether a token is a byte, a query or anything else
// that refills at a per-second rate.
const TICKS_PER_SECOND: u64 = 1_000_000;

/// Errors produced by [`Throttle`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// Requested capacity will never be available from this throttle.
    #[error("request of {request} exceeds burst capacity {burst}")]
    Capacity {
        /// The capacity requested.
        request: u64,
        /// The burst ceiling of the throttle.
        burst: u64,
    },
    /// The refill rate must be a positive, finite number.
    #[error("refill rate must be positive and finite, got {0}")]
    Rate(f64),
}

#[async_trait]
/// The clock that drives a [`Throttle`].
pub trait Clock {
    /// The number of ticks elapsed since the clock was created.
    fn ticks_elapsed(&self) -> u64;
    /// Wait for `ticks` amount of time.
    async fn wait(&self, ticks: u64);
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for RealClock {
    /// Return the number of ticks since this `Clock` was created.
    ///
    /// # Panics
    ///
    /// Function will panic if the number of ticks elapsed is greater than
    /// `u64::MAX`.
    #[allow(clippy::cast_possible_truncation)]
    fn ticks_elapsed(&self) -> u64 {
        let ticks_since: u128 = Instant::now().duration_since(self.start).as_micros();
        assert!(
            ticks_since <= u128::from(u64::MAX),
            "584,554 years elapsed since last call!"
        );
        ticks_since as u64
    }

    async fn wait(&self, ticks: u64) {
        time::sleep(Duration::from_micros(ticks)).await;
    }
}

/// Compute the burst ceiling for a refill rate and a burst multiplier.
///
/// The result is `ceil(rate * multiplier)` with a floor of one token, so a
/// throttle can always satisfy a single-token request.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn burst_for(rate_per_second: f64, burst_multiplier: f64) -> u64 {
    let burst = (rate_per_second * burst_multiplier).ceil();
    if burst < 1.0 { 1 } else { burst as u64 }
}

/// The throttle mechanism.
///
/// Tokens refill continuously at `rate_per_second` up to the burst ceiling.
/// Requests larger than the burst are rejected with [`Error::Capacity`];
/// callers that need to push more than a burst through should acquire in
/// burst-sized chunks.
#[derive(Debug)]
pub struct Throttle<C = RealClock> {
    valve: Valve,
    clock: C,
}

impl Throttle<RealClock> {
    /// Create a new [`Throttle`] against the real clock.
    ///
    /// # Errors
    ///
    /// Returns an error if `rate_per_second` is non-positive or non-finite.
    pub fn new(rate_per_second: f64, burst: u64) -> Result<Self, Error> {
        Self::with_clock(rate_per_second, burst, RealClock::default())
    }
}

impl<C> Throttle<C>
where
    C: Clock + Send + Sync,
{
    /// Create a new [`Throttle`] against the given clock.
    ///
    /// # Errors
    ///
    /// Returns an error if `rate_per_second` is non-positive or non-finite.
    pub fn with_clock(rate_per_second: f64, burst: u64, clock: C) -> Result<Self, Error> {
        Ok(Self {
            valve: Valve::new(rate_per_second, burst.max(1))?,
            clock,
        })
    }

    /// Wait for a single unit of capacity, equivalent to `wait_for` of 1.
    ///
    /// # Errors
    ///
    /// See documentation in [`Error`].
    #[inline]
    pub async fn wait(&mut self) -> Result<(), Error> {
        self.wait_for(1).await
    }

    /// Wait for `request` capacity to be available in the throttle.
    ///
    /// # Errors
    ///
    /// See documentation in [`Error`].
    pub async fn wait_for(&mut self, request: u64) -> Result<(), Error> {
        loop {
            let slop = self.valve.request(self.clock.ticks_elapsed(), request)?;
            if slop == 0 {
                break;
            }
            self.clock.wait(slop).await;
        }
        Ok(())
    }

    /// The burst ceiling of this throttle.
    #[must_use]
    pub fn burst(&self) -> u64 {
        self.valve.burst
    }

    /// The refill rate of this throttle, in tokens per second.
    #[must_use]
    pub fn rate_per_second(&self) -> f64 {
        self.valve.rate_per_tick * TICKS_PER_SECOND as f64
    }
}

/// The non-async interior of [`Throttle`]. Refill arithmetic lives here so it
/// can be exercised against synthetic tick counts.
#[derive(Debug)]
struct Valve {
    /// Tokens refilled per tick.
    rate_per_tick: f64,
    /// Ceiling past which no capacity accumulates.
    burst: u64,
    /// Spare capacity, refilled on every request.
    tokens: f64,
    /// Tick count observed by the most recent request.
    last_ticks: u64,
}

impl Valve {
    fn new(rate_per_second: f64, burst: u64) -> Result<Self, Error> {
        if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
            return Err(Error::Rate(rate_per_second));
        }
        Ok(Self {
            rate_per_tick: rate_per_second / TICKS_PER_SECOND as f64,
            burst,
            // A full bucket at startup allows an initial burst, matching the
            // behavior callers expect from a token bucket.
            tokens: burst as f64,
            last_ticks: 0,
        })
    }

    /// For a given `capacity_request` and absolute `ticks_elapsed`, return how
    /// long the caller must wait -- in ticks -- before the request can
    /// succeed. Zero means the request succeeded and capacity was deducted.
    ///
    /// Capacity is only drawn down when immediately available; a non-zero
    /// return deducts nothing.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn request(&mut self, ticks_elapsed: u64, capacity_request: u64) -> Result<u64, Error> {
        if capacity_request > self.burst {
            return Err(Error::Capacity {
                request: capacity_request,
                burst: self.burst,
            });
        }
        if capacity_request == 0 {
            return Ok(0);
        }

        // Clocks are monotonic but callers may race; never refill backwards.
        let elapsed = ticks_elapsed.saturating_sub(self.last_ticks);
        self.last_ticks = self.last_ticks.max(ticks_elapsed);
        self.tokens = (self.tokens + elapsed as f64 * self.rate_per_tick).min(self.burst as f64);

        let request = capacity_request as f64;
        if request <= self.tokens {
            self.tokens -= request;
            Ok(0)
        } else {
            let deficit = request - self.tokens;
            let slop = (deficit / self.rate_per_tick).ceil() as u64;
            Ok(slop.max(1))
        }
    }
}
