use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
    /// Fraction of each delay that is randomised (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_factor).min(self.max_delay.as_secs_f64()),
        )
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=1.0);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: &impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(attempts, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    warn!(attempts, error = %error, "operation failed");
                    return Err(error);
                }

                let wait = config.jittered(delay);
                warn!(attempts, error = %error, wait_ms = wait.as_millis() as u64, "attempt failed, retrying");

                sleep(wait).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
