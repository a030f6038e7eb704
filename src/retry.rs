//! Retry and polling with exponential backoff and jitter
//!
//! Two shapes of waiting show up during an operation:
//!
//! - [`retry_with_backoff`] re-runs an idempotent call that failed
//!   transiently, up to a fixed number of attempts.
//! - [`wait_until`] polls a health probe until it reports true, giving up
//!   once an overall deadline passes. This backs every wait-for-healthy
//!   barrier.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::{HealthCheckConfig, DEFAULT_HEALTH_TIMEOUT_SECS};
use crate::Error;

/// Configuration for calls that may fail transiently
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Scale `delay` by a random factor in 0.5x..1.5x
fn jittered(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}

fn next_delay(delay: Duration, multiplier: f64, max: Duration) -> Duration {
    Duration::from_secs_f64((delay.as_secs_f64() * multiplier).min(max.as_secs_f64()))
}

/// Execute an async operation with exponential backoff and jitter
///
/// Returns the first success, or the last error once `max_attempts` is
/// exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "operation failed after max retries"
                    );
                    return Err(e);
                }

                let wait = jittered(delay);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = wait.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = next_delay(delay, config.backoff_multiplier, config.max_delay);
            }
        }
    }
}

/// Poll `probe` until it returns `Ok(true)` or the health-check timeout passes
///
/// Probe errors count as "not healthy yet". On timeout the returned error
/// names `what` and carries the last probe error, if any.
pub async fn wait_until<F, Fut>(
    config: &HealthCheckConfig,
    what: &str,
    mut probe: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let started = Instant::now();
    let deadline = started
        .checked_add(config.timeout())
        .unwrap_or_else(|| started + Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS));
    let max_delay = config.poll_interval() * 4;
    let mut delay = config.poll_interval();
    let mut last_error: Option<String> = None;

    loop {
        match probe().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                debug!(target_name = %what, error = %e, "health probe failed");
                last_error = Some(e.to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            let mut message = format!(
                "timed out after {}s waiting for {what}",
                config.timeout().as_secs()
            );
            if let Some(e) = last_error {
                message.push_str(&format!(" (last error: {e})"));
            }
            return Err(Error::subtask(what, message));
        }

        let wait = jittered(delay).min(deadline - now);
        tokio::time::sleep(wait).await;
        delay = next_delay(delay, 2.0, max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 3.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn regeneration_recovers_on_a_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));

        let written = retry_with_backoff(&quick(4), "regenerate-alert-definitions", || {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(Error::persistence("rules file locked")),
                    n => Ok(n),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(written, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn last_error_is_returned_once_attempts_run_out() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry_with_backoff(&quick(2), "regenerate-monitoring-targets", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::persistence(format!("attempt {n} refused")))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "persistence error: attempt 1 refused");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_grows_then_caps() {
        let max = Duration::from_secs(1);
        let second = next_delay(Duration::from_millis(250), 2.0, max);
        assert_eq!(second, Duration::from_millis(500));
        assert_eq!(next_delay(second * 2, 2.0, max), max);
        let j = jittered(Duration::from_millis(100));
        assert!(j >= Duration::from_millis(50) && j <= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_returns_once_healthy() {
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();

        wait_until(&HealthCheckConfig::default(), "master on n1", || {
            let p = p.clone();
            async move { Ok(p.fetch_add(1, Ordering::SeqCst) >= 3) }
        })
        .await
        .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_does_not_overflow_the_deadline() {
        let config = HealthCheckConfig {
            timeout_secs: u64::MAX,
            poll_interval_ms: u64::MAX,
        };
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();

        wait_until(&config, "master on n1", || {
            let p = p.clone();
            async move { Ok(p.fetch_add(1, Ordering::SeqCst) >= 1) }
        })
        .await
        .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_times_out_as_subtask_failure() {
        let config = HealthCheckConfig {
            timeout_secs: 10,
            poll_interval_ms: 500,
        };
        let started = Instant::now();

        let err = wait_until(&config, "tserver on n2", || async {
            Err(Error::subtask("probe", "connection refused"))
        })
        .await
        .unwrap_err();

        assert!(started.elapsed() >= Duration::from_secs(10));
        match err {
            Error::SubTask { group, message } => {
                assert_eq!(group, "tserver on n2");
                assert!(message.contains("timed out after 10s"));
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected subtask failure, got {other:?}"),
        }
    }
}
