//! Exponential backoff for recoverable gateway failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::gateway::GatewayError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            initial_delay: Duration::from_millis(c.initial_backoff_ms),
            max_delay: Duration::from_millis(c.max_backoff_ms),
            multiplier: c.multiplier,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Run `op`, retrying recoverable errors. Non-recoverable errors and the
    /// last recoverable one are returned as-is.
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if retry > 0 {
                        debug!(op = label, retries = retry, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_recoverable() && retry < self.max_retries => {
                    retry += 1;
                    let mut delay = self.delay_for(retry);
                    if let GatewayError::RateLimited {
                        retry_after_ms: Some(ms),
                    } = &e
                    {
                        delay = delay.max(Duration::from_millis(*ms)).min(self.max_delay);
                    }
                    warn!(op = label, retry, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_recoverable() {
                        warn!(op = label, retries = retry, error = %e, "retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_and_cap() {
        let p = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_errors_are_retried_until_success() {
        let attempts = AtomicU32::new(0);
        let out = RetryPolicy::default()
            .run("test", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::Timeout)
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let out: Result<(), _> = RetryPolicy::default()
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Malformed("garbled".into()))
            })
            .await;
        assert!(matches!(out, Err(GatewayError::Malformed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unrecoverable_errors_fail_fast() {
        let attempts = AtomicU32::new(0);
        let out: Result<(), _> = RetryPolicy::default()
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Unavailable("down".into()))
            })
            .await;
        assert!(out.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
