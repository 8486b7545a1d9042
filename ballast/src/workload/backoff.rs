//! Adaptive backoff on server overload.
//!
//! A per-worker state machine keyed on response status: overload responses
//! (429, or any 5xx) grow the delay, everything else resets it. A parsable
//! `Retry-After` takes precedence over the multiplicative ladder, clamped
//! to the configured ceiling either way.

use std::time::Duration;

/// The adaptive delay state machine.
#[derive(Debug)]
pub(crate) struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: Duration::ZERO,
            min,
            max,
        }
    }

    /// The delay to apply before the next call.
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Feed one HTTP response. Returns the growth delta when the delay
    /// increased, which the caller records as a backoff event.
    pub(crate) fn on_response(
        &mut self,
        status: u16,
        retry_after_seconds: Option<u64>,
    ) -> Option<Duration> {
        let overloaded = status == 429 || (500..600).contains(&status);
        if !overloaded {
            self.current = Duration::ZERO;
            return None;
        }

        let previous = self.current;
        self.current = match retry_after_seconds {
            Some(seconds) => Duration::from_secs(seconds).min(self.max),
            None if previous.is_zero() => self.min.min(self.max),
            None => {
                let grown_ms = (previous.as_millis() * 3).div_ceil(2);
                Duration::from_millis(u64::try_from(grown_ms).unwrap_or(u64::MAX)).min(self.max)
            }
        };

        (self.current > previous).then(|| self.current - previous)
    }

    /// A transport failure with no response: the server is not overloaded,
    /// so the delay resets.
    pub(crate) fn on_transport_error(&mut self) {
        self.current = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(200), Duration::from_millis(30_000))
    }

    #[test]
    fn ladder_climbs_by_half_then_resets() {
        let mut b = backoff();
        assert_eq!(
            b.on_response(429, None),
            Some(Duration::from_millis(200)),
            "first overload starts at the minimum"
        );
        assert_eq!(b.on_response(429, None), Some(Duration::from_millis(100)));
        assert_eq!(b.current(), Duration::from_millis(300));
        assert_eq!(b.on_response(429, None), Some(Duration::from_millis(150)));
        assert_eq!(b.current(), Duration::from_millis(450));
        assert_eq!(b.on_response(200, None), None);
        assert_eq!(b.current(), Duration::ZERO);
    }

    #[test]
    fn retry_after_is_clamped_to_the_ceiling() {
        let mut b = backoff();
        b.on_response(503, Some(60));
        assert_eq!(b.current(), Duration::from_millis(30_000));
    }

    #[test]
    fn retry_after_below_ceiling_is_taken_verbatim() {
        let mut b = backoff();
        b.on_response(503, Some(5));
        assert_eq!(b.current(), Duration::from_secs(5));
    }

    #[test]
    fn non_overload_statuses_reset() {
        for status in [200_u16, 204, 301, 400, 404, 418] {
            let mut b = backoff();
            b.on_response(429, None);
            assert!(!b.current().is_zero());
            b.on_response(status, None);
            assert_eq!(b.current(), Duration::ZERO, "status {status}");
        }
    }

    #[test]
    fn transport_error_does_not_punish_the_server() {
        let mut b = backoff();
        b.on_response(429, None);
        b.on_transport_error();
        assert_eq!(b.current(), Duration::ZERO);
    }

    #[test]
    fn growth_delta_only_reported_on_growth() {
        let mut b = backoff();
        b.on_response(429, Some(10));
        // Same Retry-After again: no growth, no delta.
        assert_eq!(b.on_response(429, Some(10)), None);
        assert_eq!(b.on_response(429, Some(3)), None, "shrink reports nothing");
        assert_eq!(b.current(), Duration::from_secs(3));
    }

    proptest! {
        // A run of overload responses without Retry-After produces a
        // non-decreasing delay sequence bounded by the ceiling.
        #[test]
        fn ladder_is_monotone_and_bounded(
            rounds in 1usize..64,
            status in prop::sample::select(vec![429_u16, 500, 502, 503, 599]),
        ) {
            let mut b = backoff();
            let mut previous = Duration::ZERO;
            for _ in 0..rounds {
                b.on_response(status, None);
                prop_assert!(b.current() >= previous);
                prop_assert!(b.current() <= Duration::from_millis(30_000));
                previous = b.current();
            }
        }

        // A single success resets any state to zero.
        #[test]
        fn success_resets_from_any_state(rounds in 0usize..32, ok in 200_u16..300) {
            let mut b = backoff();
            for _ in 0..rounds {
                b.on_response(429, None);
            }
            b.on_response(ok, None);
            prop_assert_eq!(b.current(), Duration::ZERO);
        }

        // Retry-After always clamps to the ceiling.
        #[test]
        fn retry_after_clamp(seconds in 0_u64..10_000) {
            let mut b = backoff();
            b.on_response(503, Some(seconds));
            let expected = Duration::from_secs(seconds).min(Duration::from_millis(30_000));
            prop_assert_eq!(b.current(), expected);
        }
    }
}
