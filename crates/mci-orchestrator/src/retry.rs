//! Bounded fixed-delay retry
//!
//! Used for the "wait until running" poll and the agent bootstrap loop.
//! Running out of attempts yields [`TaskError::Exhausted`]; the caller
//! marks its VM failed and the rest of the fleet carries on.

use std::future::Future;
use std::time::Duration;

use mci_core::TaskError;

/// Outcome of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    /// Finished successfully
    Done(T),
    /// Not there yet; try again after the delay
    Retry(String),
    /// Give up immediately
    Fatal(TaskError),
}

/// Fixed-delay retry with an attempt bound
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Step name reported on exhaustion
    pub step: &'static str,
    pub max_attempts: u32,
    pub delay: Duration,
    /// Random extra delay as a fraction of `delay` (0.0 to 1.0)
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(step: &'static str, max_attempts: u32, delay: Duration) -> Self {
        Self {
            step,
            max_attempts,
            delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    fn next_delay(&self) -> Duration {
        if self.jitter == 0.0 {
            return self.delay;
        }
        let jitter_amount = self.delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        self.delay + Duration::from_secs_f64(jitter_amount)
    }

    /// Run `op` until it returns `Done` or `Fatal`, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. There is no delay after the
    /// last attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, TaskError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retry(reason) => {
                    if attempt < self.max_attempts {
                        let delay = self.next_delay();
                        tracing::warn!(
                            step = self.step,
                            attempt,
                            max_attempts = self.max_attempts,
                            "{}. Retrying in {:?}",
                            reason,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last = reason;
                }
            }
        }

        tracing::error!(
            step = self.step,
            attempts = self.max_attempts,
            "Giving up: {}",
            last
        );
        Err(TaskError::Exhausted {
            step: self.step,
            attempts: self.max_attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mci_core::DriverError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_never_succeeding_stops_at_bound() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new("agent bootstrap", 30, Duration::from_secs(3));

        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Retry("connection refused".to_string()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 30);
        assert_eq!(
            result.unwrap_err(),
            TaskError::Exhausted {
                step: "agent bootstrap",
                attempts: 30,
                last: "connection refused".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_attempts_only() {
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy::new("wait for running", 4, Duration::from_secs(5));
        let _ = policy
            .run(|_| async { Attempt::<()>::Retry("creating".to_string()) })
            .await;
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let policy = RetryPolicy::new("wait for running", 10, Duration::from_millis(100));
        let result = policy
            .run(|attempt| async move {
                if attempt < 3 {
                    Attempt::Retry(format!("attempt {attempt}"))
                } else {
                    Attempt::Done(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new("wait for running", 10, Duration::from_millis(1));
        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Fatal(DriverError::Provider("quota exceeded".to_string()).into()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(TaskError::Driver(_))));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::new("x", 1, Duration::from_secs(2)).with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.next_delay();
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(3));
        }
    }
}
