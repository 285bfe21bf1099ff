use serde::{Deserialize, Serialize};

/// Retry policy configuration for bounded operations such as action delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up. Values below 1 are
    /// treated as 1 (a single attempt, no retry).
    pub max_attempts: u32,
    /// Initial delay, in milliseconds, before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier applied to the delay after each attempt.
    pub backoff_factor: f32,
    /// Optional jitter fraction (0.0..=1.0) applied to each delay. Zero
    /// disables jitter, which keeps retry timing fully deterministic.
    #[serde(default)]
    pub jitter: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }
}

/// Backoff configuration for unbounded reconnect loops.
///
/// Unlike [`RetryConfig`] there is no attempt cap: a wanted connection keeps
/// retrying with capped exponential delays until it is explicitly closed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay, in milliseconds, before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier applied per failed attempt.
    pub backoff_factor: f32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}
