//! Exponential backoff with jitter for provider reconnection.
//!
//! One [`RetryPolicy`] is configured per process (`[backoff]` in the
//! static configuration) and every provider builds its own
//! [`ExponentialBackoff`] from it. Retries are unbounded; the delay is
//! capped at `max_interval`. A session that stayed healthy for at least
//! `reset_after` starts the next failure sequence from the initial delay
//! again.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

const fn default_initial_interval_ms() -> u64 {
    500
}

const fn default_multiplier() -> f64 {
    1.5
}

const fn default_randomization_factor() -> f64 {
    0.5
}

const fn default_max_interval_ms() -> u64 {
    60_000
}

const fn default_reset_after_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter as a fraction of the delay: 0.5 spreads each delay over
    /// `[0.5 * d, 1.5 * d]`.
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "default_reset_after_ms")]
    pub reset_after_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
            max_interval_ms: default_max_interval_ms(),
            reset_after_ms: default_reset_after_ms(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            policy: self.clone(),
            attempt: 0,
        }
    }

    #[must_use]
    pub const fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Delay before the next retry, before jitter is applied.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn base_delay(&self) -> Duration {
        let max = self.policy.max_interval_ms as f64;
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let ms = (self.policy.initial_interval_ms as f64 * self.policy.multiplier.powi(exponent))
            .min(max);
        Duration::from_millis(ms as u64)
    }

    /// Advance to the next attempt and return the jittered delay.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay().as_millis() as f64;
        self.attempt = self.attempt.saturating_add(1);

        let factor = self.policy.randomization_factor.clamp(0.0, 1.0);
        if factor == 0.0 || base == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let delta = base * factor;
        let jittered = rand::thread_rng().gen_range((base - delta)..=(base + delta));
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Run `operation` until it succeeds or `cancel` fires.
///
/// Each failure is handed to `notify` together with the delay before the
/// next attempt, then the loop sleeps. Cancellation, during the operation
/// or during the wait, ends the loop with `Ok(())` and is never reported
/// as a failure.
pub async fn retry_notify<F, Fut, N>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    mut notify: N,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ProviderError>>,
    N: FnMut(&ProviderError, Duration),
{
    let mut backoff = policy.backoff();

    loop {
        let started = tokio::time::Instant::now();
        let result = tokio::select! {
            r = operation() => r,
            () = cancel.cancelled() => return,
        };

        let err = match result {
            Ok(()) => return,
            Err(e) => e,
        };
        if cancel.is_cancelled() {
            return;
        }

        if started.elapsed() >= policy.reset_after() {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        notify(&err, delay);

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            initial_interval_ms: 100,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_interval_ms: 1_000,
            reset_after_ms: 60_000,
        }
    }

    #[test]
    fn delays_grow_then_cap() {
        let mut backoff = no_jitter().backoff();
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn jitter_stays_within_factor() {
        let policy = RetryPolicy {
            randomization_factor: 0.5,
            ..no_jitter()
        };
        for _ in 0..50 {
            let mut backoff = policy.backoff();
            let d = backoff.next_delay().as_millis();
            assert!((50..=150).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = no_jitter().backoff();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay().as_millis(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut notified = Vec::new();
        retry_notify(
            &no_jitter(),
            &CancellationToken::new(),
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Io(std::io::Error::other("down")))
                } else {
                    Ok(())
                }
            },
            |_, delay| notified.push(delay),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            notified,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_backoff_wait() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let mut failures = 0;
        retry_notify(
            &RetryPolicy {
                initial_interval_ms: 3_600_000,
                max_interval_ms: 3_600_000,
                ..no_jitter()
            },
            &cancel,
            || async { Err(ProviderError::Io(std::io::Error::other("down"))) },
            |_, _| {
                failures += 1;
                canceller.cancel();
            },
        )
        .await;
        assert_eq!(failures, 1);
    }
}
