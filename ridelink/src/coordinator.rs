//! Queue draining over the live connection.
//!
//! The coordinator subscribes to connection state transitions and, on every
//! transition into `Connected`, replays the pending action queue strictly in
//! enqueue order. Each action is delivered at least once; the server
//! deduplicates on the idempotency key.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::connection::manager::{ConnectionClient, DeliveryRequest};
use crate::connection::state::ConnectionState;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::{
    ACTIONS_DELIVERED_TOTAL, ACTIONS_FAILED_TOTAL, DELIVERY_DURATION_SECONDS, QUEUE_DEPTH,
};
use crate::queue::action::QueuedAction;
use crate::queue::store::base::ActionStore;
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::workers::base::{Worker, WorkerHandle, WorkerType, wait_for_task};

/// An action the server rejected terminally. Retrying it would never succeed,
/// so it has been removed from the queue and is surfaced for the user to act
/// on.
#[derive(Debug)]
pub struct PermanentFailure {
    pub action: QueuedAction,
    pub error: SyncError,
}

/// Worker that drains the action queue whenever the connection comes up.
#[derive(Debug)]
pub struct SyncCoordinator<S> {
    store: S,
    client: ConnectionClient,
    drain_retry: RetryPolicy,
    notices_tx: mpsc::Sender<PermanentFailure>,
    shutdown_rx: ShutdownRx,
}

impl<S> SyncCoordinator<S> {
    pub fn new(
        store: S,
        client: ConnectionClient,
        drain_retry: RetryPolicy,
        notices_tx: mpsc::Sender<PermanentFailure>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            store,
            client,
            drain_retry,
            notices_tx,
            shutdown_rx,
        }
    }
}

impl<S> Worker<SyncCoordinatorHandle, ()> for SyncCoordinator<S>
where
    S: ActionStore,
{
    type Error = SyncError;

    async fn start(self) -> SyncResult<SyncCoordinatorHandle> {
        info!("starting sync coordinator");

        let span = tracing::info_span!("sync_coordinator");
        let handle = tokio::spawn(self.run().instrument(span));

        Ok(SyncCoordinatorHandle {
            handle: Some(handle),
        })
    }
}

#[derive(Debug)]
pub struct SyncCoordinatorHandle {
    handle: Option<JoinHandle<SyncResult<()>>>,
}

impl WorkerHandle<()> for SyncCoordinatorHandle {
    fn state(&self) {}

    async fn wait(mut self) -> SyncResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        wait_for_task(WorkerType::Drain, handle).await
    }
}

impl<S> SyncCoordinator<S>
where
    S: ActionStore,
{
    async fn run(mut self) -> SyncResult<()> {
        let mut states = self.client.subscribe_states();

        // The manager may already be connected by the time we subscribe.
        if self.client.state().is_connected() {
            self.drain().await?;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    info!("shutting down sync coordinator");
                    return Ok(());
                }
                state = states.recv() => match state {
                    Ok(ConnectionState::Connected) => {
                        self.drain().await?;
                    }
                    Ok(ConnectionState::Closed) => {
                        info!("connection closed, stopping sync coordinator");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "lagged behind connection state stream, resubscribing");
                        states = states.resubscribe();
                        if self.client.state().is_connected() {
                            self.drain().await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    /// Runs one drain pass: snapshot the pending actions and deliver them
    /// strictly in order.
    ///
    /// The pass halts early when an action exhausts its retry budget (later
    /// actions may depend on it) or when the connection drops mid-drain. A
    /// terminal rejection removes the action, surfaces a notice, and the pass
    /// continues. Only storage failures propagate out of here.
    async fn drain(&mut self) -> SyncResult<()> {
        let pending = self.store.list_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }

        info!(pending = pending.len(), "draining action queue");

        for action in pending {
            let request = DeliveryRequest {
                idempotency_key: action.idempotency_key.clone(),
                action_type: action.action_type,
                payload: action.payload.clone(),
            };

            let started = Instant::now();
            let client = &self.client;
            let result = execute_with_retry(&self.drain_retry, self.shutdown_rx.clone(), || {
                client.deliver(request.clone())
            })
            .await;

            match result {
                Ok(outcome) => {
                    self.store.remove(action.id).await?;
                    metrics::counter!(ACTIONS_DELIVERED_TOTAL).increment(1);
                    metrics::histogram!(DELIVERY_DURATION_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                    debug!(
                        id = action.id,
                        attempts = outcome.attempts,
                        "action delivered"
                    );
                }
                Err(err) if err.kind() == ErrorKind::ConnectionClosed => {
                    // Mid-drain disconnect: abort the pass without touching
                    // the attempt count and wait for the next connection.
                    debug!(id = action.id, "connection dropped mid-drain, aborting pass");
                    self.update_queue_depth().await;
                    return Ok(());
                }
                Err(err) if err.kind().is_retryable() => {
                    // Retry budget exhausted. The action stays queued and
                    // blocks the rest of the pass, since later actions may
                    // causally depend on it.
                    warn!(id = action.id, error = %err, "delivery retries exhausted, halting drain pass");
                    self.store.increment_attempts(action.id).await?;
                    self.update_queue_depth().await;
                    return Ok(());
                }
                Err(err) => {
                    warn!(id = action.id, error = %err, "action rejected terminally, dropping it");
                    self.store.remove(action.id).await?;
                    metrics::counter!(ACTIONS_FAILED_TOTAL).increment(1);

                    if self
                        .notices_tx
                        .try_send(PermanentFailure { action, error: err })
                        .is_err()
                    {
                        warn!("permanent failure notice dropped, receiver is full or gone");
                    }
                }
            }

            self.update_queue_depth().await;
        }

        Ok(())
    }

    async fn update_queue_depth(&self) {
        if let Ok(depth) = self.store.len().await {
            metrics::gauge!(QUEUE_DEPTH).set(depth as f64);
        }
    }
}
