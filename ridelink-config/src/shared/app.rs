use serde::{Deserialize, Serialize};

use crate::shared::{ConnectionConfig, QueueConfig, RetryConfig};

/// Top-level configuration for the connectivity and synchronization core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Persistent connection parameters.
    pub connection: ConnectionConfig,
    /// Durable queue storage parameters.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Retry policy for the direct (online) submission path. Kept short so a
    /// flaky request falls back to the queue quickly instead of blocking the
    /// caller.
    #[serde(default = "default_submit_retry")]
    pub submit_retry: RetryConfig,
    /// Retry policy applied per action while draining the queue.
    #[serde(default)]
    pub drain_retry: RetryConfig,
}

fn default_submit_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 250,
        max_delay_ms: 2_000,
        backoff_factor: 2.0,
        jitter: 0.0,
    }
}

impl AppConfig {
    /// Returns a configuration suitable for local development.
    pub fn localhost(port: u16) -> Self {
        Self {
            connection: ConnectionConfig::localhost(port),
            queue: QueueConfig::default(),
            submit_retry: default_submit_retry(),
            drain_retry: RetryConfig::default(),
        }
    }
}
