//! Byte-rate limiting.

use ballast_throttle::{Throttle, burst_for};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const DEFAULT_BURST_MULTIPLIER: f64 = 1.5;

/// Errors produced by [`ByteRateLimiter`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The wait was cancelled by the surrounding iteration.
    #[error("rate limiter wait cancelled")]
    Cancelled,
    /// The underlying throttle rejected the request.
    #[error(transparent)]
    Throttle(#[from] ballast_throttle::Error),
}

/// A token bucket over bytes.
///
/// One token is one byte. Requests larger than the burst are acquired in
/// burst-sized chunks until consumed or cancelled. `set_rate` swaps the
/// underlying throttle atomically with respect to waiting callers.
#[derive(Debug)]
pub struct ByteRateLimiter {
    inner: Mutex<Throttle>,
}

impl ByteRateLimiter {
    /// Create a limiter for `target_mbps` megabytes per second.
    ///
    /// Non-positive rates fall back to 1 MB/s and non-positive burst
    /// multipliers to 1.5, so construction cannot fail.
    #[must_use]
    pub fn new(target_mbps: f64, burst_multiplier: f64) -> Self {
        let mbps = if target_mbps.is_finite() && target_mbps > 0.0 {
            target_mbps
        } else {
            1.0
        };
        let multiplier = if burst_multiplier.is_finite() && burst_multiplier > 0.0 {
            burst_multiplier
        } else {
            DEFAULT_BURST_MULTIPLIER
        };
        let rate = mbps * BYTES_PER_MB;
        let throttle =
            Throttle::new(rate, burst_for(rate, multiplier)).expect("rate is positive and finite");
        Self {
            inner: Mutex::new(throttle),
        }
    }

    /// Acquire `bytes` tokens, waiting as needed.
    ///
    /// Requests beyond the burst are drained in burst-sized chunks.
    /// Cancellation returns promptly between chunks and during any wait.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token fires first.
    pub async fn wait(&self, bytes: usize, cancel: &CancellationToken) -> Result<(), Error> {
        if bytes == 0 {
            return Ok(());
        }

        let mut remaining = bytes as u64;
        let mut throttle = tokio::select! {
            guard = self.inner.lock() => guard,
            () = cancel.cancelled() => return Err(Error::Cancelled),
        };
        while remaining > 0 {
            let chunk = remaining.min(throttle.burst());
            tokio::select! {
                result = throttle.wait_for(chunk) => result?,
                () = cancel.cancelled() => return Err(Error::Cancelled),
            }
            remaining -= chunk;
        }
        Ok(())
    }

    /// Swap the limiter for a new rate. The new burst uses the default
    /// multiplier. Non-positive rates are ignored.
    pub async fn set_rate(&self, target_mbps: f64) {
        if !target_mbps.is_finite() || target_mbps <= 0.0 {
            return;
        }
        let rate = target_mbps * BYTES_PER_MB;
        let throttle = Throttle::new(rate, burst_for(rate, DEFAULT_BURST_MULTIPLIER))
            .expect("rate is positive and finite");
        *self.inner.lock().await = throttle;
    }

    /// The current burst ceiling in bytes.
    pub async fn burst(&self) -> u64 {
        self.inner.lock().await.burst()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test]
    async fn zero_bytes_returns_immediately() {
        let limiter = ByteRateLimiter::new(1.0, 1.5);
        let cancel = CancellationToken::new();
        limiter.wait(0, &cancel).await.expect("wait");
    }

    #[tokio::test]
    async fn burst_scales_with_multiplier() {
        let limiter = ByteRateLimiter::new(1.0, 1.5);
        let expected = (1.5 * BYTES_PER_MB).ceil() as u64;
        assert_eq!(limiter.burst().await, expected);
    }

    #[tokio::test]
    async fn non_positive_inputs_fall_back_to_defaults() {
        let limiter = ByteRateLimiter::new(-2.0, 0.0);
        let expected = (1.5 * BYTES_PER_MB).ceil() as u64;
        assert_eq!(limiter.burst().await, expected);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_large_requests() {
        let limiter = ByteRateLimiter::new(1.0, 1.5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Far larger than the burst; without cancellation this would wait
        // for many seconds of refill.
        let result = limiter.wait(64 * 1024 * 1024, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn set_rate_swaps_the_burst() {
        let limiter = ByteRateLimiter::new(1.0, 2.0);
        limiter.set_rate(4.0).await;
        let expected = (4.0 * BYTES_PER_MB * 1.5).ceil() as u64;
        assert_eq!(limiter.burst().await, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn three_megabytes_from_empty_takes_three_seconds() {
        let limiter = ByteRateLimiter::new(1.0, 1.5);
        let cancel = CancellationToken::new();

        // Drain the initial burst so the bucket starts empty.
        let burst = limiter.burst().await;
        limiter
            .wait(usize::try_from(burst).expect("burst fits usize"), &cancel)
            .await
            .expect("drain");

        let started = Instant::now();
        limiter
            .wait(3 * 1024 * 1024, &cancel)
            .await
            .expect("wait completes");
        let elapsed = started.elapsed();

        // 3 MiB at 1 MB/s is three seconds of refill; chunked acquisition may
        // finish up to one burst (1.5 MB, 1.5 s) early or late.
        assert!(
            elapsed >= Duration::from_secs(3) - Duration::from_millis(1600),
            "elapsed {elapsed:?} shorter than refill allows"
        );
        assert!(
            elapsed <= Duration::from_secs(3) + Duration::from_millis(1600),
            "elapsed {elapsed:?} beyond one burst of slack"
        );
    }
}
