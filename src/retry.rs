use crate::error::Result;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Backoff policy for establishing transport sessions.
///
/// Publishing does not use this: a rejected send is retried immediately by
/// the pipeline's own bounded loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` retries until the operation succeeds.
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Constant delay, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            exponential_base: 1.0,
            jitter: false,
            ..Default::default()
        }
    }

    /// Execute operation with retry logic
    pub fn execute<F, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            attempt += 1;

            match operation() {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let exhausted = self.max_attempts.is_some_and(|max| attempt >= max);
                    if !err.is_recoverable() || exhausted {
                        return Err(err);
                    }

                    warn!(
                        "Operation failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt,
                        self.max_attempts
                            .map_or_else(|| "unbounded".to_string(), |m| m.to_string()),
                        err,
                        delay
                    );

                    thread::sleep(delay);
                    delay = self.calculate_next_delay(delay);
                }
            }
        }
    }

    fn calculate_next_delay(&self, current_delay: Duration) -> Duration {
        let mut next_delay =
            Duration::from_secs_f64(current_delay.as_secs_f64() * self.exponential_base);

        if self.jitter {
            use rand::Rng;
            let mut rng = rand::rng();
            let jitter_factor = rng.random_range(0.5..1.5);
            next_delay = Duration::from_secs_f64(next_delay.as_secs_f64() * jitter_factor);
        }

        next_delay.min(self.max_delay)
    }
}
