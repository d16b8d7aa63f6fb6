//! Retry logic with exponential backoff for the Fabric control plane.
//!
//! One policy type covers every wait in the tool: name-propagation backoff,
//! id resolution after an accepted create, and the definition stage walk.
//! A policy is bounded by an attempt count, a wall-clock deadline, or both.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub add_jitter: bool,
    /// Overall wall-clock budget. A retry whose delay would end past the
    /// deadline is not started.
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
            deadline: None,
        }
    }
}

impl RetryConfig {
    /// Backoff while a deleted item's display name is still reserved.
    pub fn for_name_propagation() -> Self {
        Self {
            max_retries: 7,
            initial_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
            add_jitter: false,
            deadline: None,
        }
    }

    /// Fixed-interval lookups until an accepted item becomes queryable.
    pub fn for_id_lookup() -> Self {
        Self {
            max_retries: 19,
            initial_delay: Duration::from_secs(6),
            max_delay: Duration::from_secs(6),
            backoff_multiplier: 1.0,
            add_jitter: false,
            deadline: None,
        }
    }

    /// Copy jobs show up faster than warehouses; poll them more often.
    pub fn for_copy_job_id_lookup() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3),
            ..Self::for_id_lookup()
        }
    }

    /// Outer loop of the definition stage walk.
    pub fn for_definition_update() -> Self {
        Self {
            max_retries: u32::MAX,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(20),
            backoff_multiplier: 2.0,
            add_jitter: false,
            deadline: Some(Duration::from_secs(420)),
        }
    }

    /// Creates a config with no retries (for testing or when retries are unwanted).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            deadline: None,
        }
    }

    /// Calculates the delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // Add up to 25% jitter
            let jitter = capped_delay * 0.25 * rand_jitter();
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// True when sleeping `delay` now would end past the deadline.
    fn would_overrun(&self, started: Instant, delay: Duration) -> bool {
        self.deadline
            .is_some_and(|deadline| started.elapsed() + delay > deadline)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external dependencies.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

/// Executes an async operation, retrying while `is_retryable` accepts the error.
///
/// Non-retryable errors are returned unchanged. When the attempt budget runs
/// out the last error is wrapped in [`Error::RetriesExhausted`]; when the
/// deadline would be crossed it is wrapped in [`Error::Timeout`].
pub async fn with_retry<F, Fut, T, R>(
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let started = Instant::now();
    let max_attempts = config.max_attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{}: Succeeded after {} retries", operation_name, attempt - 1);
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(Error::RetriesExhausted {
                operation: operation_name.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = config.delay_for_attempt(attempt);
        if config.would_overrun(started, delay) {
            return Err(Error::Timeout {
                operation: operation_name.to_string(),
                attempts: attempt,
                elapsed: started.elapsed(),
                last_error: Some(Box::new(err)),
            });
        }

        warn!(
            "{}: Retryable error (attempt {}): {}; waiting {:?}",
            operation_name, attempt, err, delay
        );
        sleep(delay).await;
    }
}

/// Polls `probe` at the policy's interval until it yields `Some`.
///
/// Probe errors are returned immediately. Running out of attempts yields
/// [`Error::Timeout`] without a last error.
pub async fn poll_until<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let max_attempts = config.max_attempts();

    for attempt in 1..=max_attempts {
        if let Some(found) = probe().await? {
            return Ok(found);
        }
        if attempt == max_attempts {
            break;
        }
        let delay = config.delay_for_attempt(attempt);
        if config.would_overrun(started, delay) {
            break;
        }
        debug!(
            "{}: not ready (attempt {}/{}), polling again in {:?}",
            operation_name, attempt, max_attempts, delay
        );
        sleep(delay).await;
    }

    Err(Error::Timeout {
        operation: operation_name.to_string(),
        attempts: max_attempts,
        elapsed: started.elapsed(),
        last_error: None,
    })
}
