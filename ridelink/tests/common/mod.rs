use std::time::Duration;

use ridelink::connection::state::{ConnectionState, ConnectionStateType};
use ridelink::error::SyncResult;
use ridelink::queue::store::base::ActionStore;
use ridelink_config::shared::{AppConfig, BackoffConfig, ConnectionConfig, RetryConfig};
use tokio::sync::broadcast;

/// Connection parameters with short, deterministic timers for paused-time
/// tests.
pub fn test_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        host: "test".to_owned(),
        port: 0,
        auth_token: "test-token".to_owned().into(),
        connect_timeout_ms: 1_000,
        // Long enough that heartbeats stay out of the way unless a test
        // shortens them on purpose.
        heartbeat_interval_ms: 600_000,
        heartbeat_timeout_ms: 600_000,
        ack_timeout_ms: 5_000,
        reconnect: BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            backoff_factor: 2.0,
        },
    }
}

pub fn test_app_config() -> AppConfig {
    AppConfig {
        connection: test_connection_config(),
        queue: Default::default(),
        submit_retry: RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 50,
            max_delay_ms: 500,
            backoff_factor: 2.0,
            jitter: 0.0,
        },
        drain_retry: RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 50,
            max_delay_ms: 500,
            backoff_factor: 2.0,
            jitter: 0.0,
        },
    }
}

/// Receives state transitions until one of the given type arrives, returning
/// everything observed including it.
pub async fn collect_states_until(
    states: &mut broadcast::Receiver<ConnectionState>,
    target: ConnectionStateType,
) -> Vec<ConnectionState> {
    let mut observed = Vec::new();

    loop {
        let state = tokio::time::timeout(Duration::from_secs(120), states.recv())
            .await
            .expect("timed out waiting for a state transition")
            .expect("state stream ended unexpectedly");
        let state_type = state.as_type();
        observed.push(state);

        if state_type == target {
            return observed;
        }
    }
}

/// Polls the store until the queue is empty.
pub async fn wait_for_empty_queue<S: ActionStore>(store: &S) {
    wait_for_depth(store, 0).await;
}

/// Polls the store until the queue holds exactly `depth` actions.
pub async fn wait_for_depth<S: ActionStore>(store: &S, depth: usize) {
    let poll = async {
        loop {
            let len: SyncResult<usize> = store.len().await;
            if len.expect("store failed") == depth {
                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    tokio::time::timeout(Duration::from_secs(120), poll)
        .await
        .expect("timed out waiting for queue depth");
}
