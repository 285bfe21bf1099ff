//! Generic exponential-backoff retry execution.
//!
//! [`execute_with_retry`] wraps any fallible async operation and retries it
//! according to a [`RetryPolicy`] until it succeeds, fails with a
//! non-retryable kind, or exhausts its attempt budget. The executor knows
//! nothing about networking; retry eligibility is decided entirely by the
//! classified [`ErrorKind`] of each failure.

use std::future::Future;
use std::time::Duration;

use ridelink_config::shared::RetryConfig;
use tracing::debug;

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::RETRY_ATTEMPTS_TOTAL;

/// Retry policy resolved from a [`RetryConfig`].
///
/// Lives in the core crate rather than the config crate because the optional
/// retryable-kind whitelist references [`ErrorKind`]; the plain-data config
/// stays serialization-friendly.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay growth.
    pub max_delay: Duration,
    /// Multiplier applied to the delay per attempt.
    pub factor: f32,
    /// Jitter fraction (0.0..=1.0) applied to each delay; zero disables it.
    pub jitter: f32,
    /// Kinds considered retryable. [`None`] falls back to
    /// [`ErrorKind::is_retryable`].
    pub retryable_kinds: Option<Vec<ErrorKind>>,
}

impl RetryPolicy {
    /// Builds a policy from the shared configuration with the default
    /// retryable set.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            factor: config.backoff_factor,
            jitter: config.jitter,
            retryable_kinds: None,
        }
    }

    /// Restricts retries to an explicit set of kinds.
    pub fn with_retryable_kinds(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.retryable_kinds = Some(kinds);
        self
    }

    /// Returns `true` if a failure of `kind` should be retried under this
    /// policy.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        match &self.retryable_kinds {
            Some(kinds) => kinds.contains(&kind),
            None => kind.is_retryable(),
        }
    }

    /// Returns the delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = backoff_delay(self.initial_delay, self.max_delay, self.factor, attempt);
        apply_jitter(delay, self.jitter)
    }
}

/// Computes the capped exponential backoff delay for a failed attempt.
///
/// Attempts are 1-indexed: attempt 1 waits `initial`, attempt 2 waits
/// `initial * factor`, and so on, clamped at `max`. A zero initial delay, or
/// a factor whose multiplier is NaN or non-positive, degrades to a zero wait
/// rather than looping forever on a bad configuration. A multiplier that
/// overflows to infinity is just a delay past the cap and clamps to `max`;
/// attempt counts grow without bound during a long outage and must never
/// collapse the delay back to zero.
pub fn backoff_delay(initial: Duration, max: Duration, factor: f32, attempt: u32) -> Duration {
    if initial.is_zero() {
        return Duration::ZERO;
    }

    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let multiplier = factor.powi(exponent);
    if multiplier.is_nan() || multiplier <= 0.0 {
        return Duration::ZERO;
    }

    let delay_ms = (initial.as_millis() as f64) * multiplier as f64;
    let capped_ms = delay_ms.min(max.as_millis() as f64);

    Duration::from_millis(capped_ms as u64)
}

/// Applies a symmetric jitter fraction to a delay.
fn apply_jitter(delay: Duration, jitter: f32) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }

    use rand::Rng;
    let jitter = jitter.min(1.0) as f64;
    let spread = rand::rng().random_range(-jitter..=jitter);
    let jittered_ms = delay.as_millis() as f64 * (1.0 + spread);

    Duration::from_millis(jittered_ms.max(0.0) as u64)
}

/// Successful outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Value produced by the successful attempt.
    pub value: T,
    /// Number of attempts performed, including the successful one.
    pub attempts: u32,
}

/// Executes `operation` under the given retry policy.
///
/// The first attempt runs immediately. On a failure whose kind is retryable
/// and with attempts remaining, the executor waits the backoff delay before
/// trying again; the wait is a suspension point that is cancelled when
/// shutdown is signaled, in which case the last failure is returned. No delay
/// is incurred after the terminal attempt, and the failure reported to the
/// caller is always the last one observed.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut shutdown_rx: ShutdownRx,
    mut operation: F,
) -> SyncResult<RetryOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) => {
                let kind = err.kind();
                if !policy.is_retryable(kind) || attempt >= policy.max_attempts {
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                metrics::counter!(RETRY_ATTEMPTS_TOTAL).increment(1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = ?kind,
                    "operation failed with a retryable kind, waiting before next attempt"
                );

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        debug!("shutdown signaled during retry wait, giving up");
                        return Err(err);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
            }
        }
    }
}
