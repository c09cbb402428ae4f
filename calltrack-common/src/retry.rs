//! Retry and backoff helpers
//!
//! Cancellation is cooperative: a cancelled token cuts a backoff sleep short
//! and the last error is returned to the caller.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff with proportional jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Jitter ratio; 0.3 spreads each delay over +/-30%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            min_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `attempts` total tries
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            retries: attempts.saturating_sub(1),
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (0-based)
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = self.factor.powi(retry.min(32) as i32);
        let millis = (self.min_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Jittered delay before retry number `retry`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry).as_millis() as f64;
        let spread = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 - spread + rand::thread_rng().gen::<f64>() * spread * 2.0;
        Duration::from_millis((base * factor) as u64)
    }
}

/// Uniformly random delay in `[min_ms, max_ms]`
pub fn jitter_between(min_ms: u64, max_ms: u64) -> Duration {
    let (lo, hi) = if min_ms <= max_ms { (min_ms, max_ms) } else { (max_ms, min_ms) };
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

/// Sleep unless cancelled first; returns false when cancelled
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Run `operation` until it succeeds, the error is not retryable, the policy
/// is exhausted or `cancel` fires.
///
/// The closure receives the 0-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    should_retry: P,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= policy.retries || !should_retry(&err) {
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );

                if !sleep_cancellable(delay, cancel).await {
                    tracing::debug!(operation = operation_name, "Retry cancelled");
                    return Err(err);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn base_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(300));
        assert_eq!(policy.base_delay(1), Duration::from_millis(600));
        assert_eq!(policy.base_delay(10), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_thirty_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let ms = policy.delay_for(1).as_millis();
            assert!((419..=780).contains(&ms), "delay {} out of range", ms);
        }
    }

    #[test]
    fn jitter_between_respects_bounds() {
        for _ in 0..200 {
            let ms = jitter_between(15, 50).as_millis();
            assert!((15..=50).contains(&ms));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::with_attempts(3);
        let cancel = CancellationToken::new();

        let result: std::result::Result<u32, Error> =
            retry_with_backoff("test", &policy, &cancel, |e: &Error| e.is_retryable(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(Error::Transient("503".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::with_attempts(5);
        let cancel = CancellationToken::new();

        let result: std::result::Result<(), Error> =
            retry_with_backoff("test", &policy, &cancel, |e: &Error| e.is_retryable(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Fatal("400".into())) }
            })
            .await;

        assert!(matches!(result, Err(Error::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_backoff() {
        let policy = RetryPolicy {
            retries: 5,
            min_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: std::result::Result<(), Error> =
            retry_with_backoff("test", &policy, &cancel, |_: &Error| true, |_| async {
                Err(Error::Transient("reset".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::Transient(_))));
    }
}
