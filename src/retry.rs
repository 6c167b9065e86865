//! Exponential backoff shared by the GitLab client and the mirror synchronizer.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Classifies a failure for the retry loop.
pub trait Transient {
    /// Whether another attempt might succeed.
    fn is_transient(&self) -> bool;

    /// Server-mandated minimum wait before the next attempt (e.g. `Retry-After`).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added as uniform random jitter.
    pub jitter: f64,
}

/// The last error seen once the retry loop gave up.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Deterministic part of the delay after `attempt` (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter = if self.jitter > 0.0 && !backoff.is_zero() {
            backoff.mul_f64(rand::thread_rng().gen_range(0.0..=self.jitter))
        } else {
            Duration::ZERO
        };
        let delay = backoff + jitter;
        match hint {
            Some(wait) => delay.max(wait.min(self.max_delay)),
            None => delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// When `cancel` is set the loop stops scheduling further attempts and
    /// returns the last failure.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        cancel: Option<&AtomicBool>,
        mut op: F,
    ) -> Result<T, Exhausted<E>>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let cancelled = cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false);
            if !error.is_transient() || attempt >= max_attempts || cancelled {
                if error.is_transient() && attempt >= max_attempts {
                    warn!("{} gave up after {} attempt(s): {}", label, attempt, error);
                }
                return Err(Exhausted { attempts: attempt, error });
            }

            let delay = self.delay_for(attempt, error.retry_after());
            debug!(
                "{} attempt {}/{} failed ({}), retrying in {:?}",
                label, attempt, max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    struct Failure {
        transient: bool,
    }

    impl std::fmt::Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transient={}", self.transient)
        }
    }

    impl Transient for Failure {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: 0.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_secs(3));
        assert_eq!(policy.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = fast_policy(3);
        let delay = policy.delay_for(1, Some(Duration::from_secs(60)));
        assert_eq!(delay, Duration::from_millis(2));
    }

    #[test]
    fn test_from_config_never_allows_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::from(&config).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Exhausted<Failure>> = fast_policy(4)
            .run("op", None, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Failure { transient: true })
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Exhausted<Failure>> = fast_policy(5)
            .run("op", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Failure { transient: false })
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_respected() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Exhausted<Failure>> = fast_policy(3)
            .run("op", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Failure { transient: true })
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let cancel = AtomicBool::new(true);
        let calls = AtomicU32::new(0);
        let result: Result<(), Exhausted<Failure>> = fast_policy(5)
            .run("op", Some(&cancel), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Failure { transient: true })
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
