//! Capped exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Exponential delay schedule: `initial * 2^attempt`, never above `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// How many times [`Backoff::retry`] runs the operation in total.
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            max_attempts: 5,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns the delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Runs `op` until it succeeds or `max_attempts` runs have failed.
    ///
    /// Sleeps [`delay_for`](Self::delay_for) between runs and returns the
    /// last error together with the number of attempts made.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, (E, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err((e, attempt));
                    }
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delays_double_until_capped() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(60), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::default().with_max_attempts(5);
        let result: Result<u32, (String, u32)> = backoff
            .retry("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("boom".to_string()) } else { Ok(n) }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::default().with_max_attempts(3);
        let result: Result<(), (String, u32)> = backoff
            .retry("always", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "down");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
