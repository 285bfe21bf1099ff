//! Session orchestration and the mutation entry point.
//!
//! Contains the main [`SyncSession`] struct that wires the connection manager
//! and the sync coordinator together. Manages worker lifecycles, shutdown
//! coordination, and the online/offline submission path.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use ridelink_config::shared::AppConfig;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::connection::manager::{
    ConnectionClient, ConnectionManager, ConnectionManagerHandle, DeliveryRequest, ServerEvent,
};
use crate::connection::state::ConnectionState;
use crate::connection::transport::Transport;
use crate::coordinator::{PermanentFailure, SyncCoordinator, SyncCoordinatorHandle};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::register_metrics;
use crate::queue::action::{ActionType, NewAction, QueuedAction};
use crate::queue::store::base::ActionStore;
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::workers::base::{Worker, WorkerHandle};

const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// How a submitted mutation was handled.
#[derive(Debug)]
pub enum Submission {
    /// The server acknowledged the action during the call.
    Delivered,
    /// The action was durably queued for later synchronization.
    Queued(QueuedAction),
}

/// Internal state tracking for the session lifecycle.
#[derive(Debug)]
enum SessionState {
    /// Session has been created but not yet started.
    NotStarted,
    /// Session is running with active workers.
    Started {
        connection: ConnectionManagerHandle,
        coordinator: SyncCoordinatorHandle,
        client: ConnectionClient,
    },
}

/// The resilient connectivity and synchronization core of a client session.
///
/// A [`SyncSession`] owns one persistent connection, one durable action queue,
/// and the coordinator that drains the queue whenever the connection comes up.
/// Mutations enter through [`SyncSession::submit`]: delivered directly while
/// online, durably queued otherwise.
///
/// The session is terminal once shut down; leaving `Closed` means building a
/// fresh session, which starts its reconnect cycle from scratch.
#[derive(Debug)]
pub struct SyncSession<S, T> {
    config: Arc<AppConfig>,
    store: S,
    transport: Option<T>,
    state: SessionState,
    shutdown_tx: ShutdownTx,
    capability_tx: watch::Sender<bool>,
    /// Embedder-reported device network capability.
    network_capable: bool,
    /// False while the application is backgrounded.
    foreground: bool,
    submit_retry: RetryPolicy,
    drain_retry: RetryPolicy,
    /// Counter behind direct-submission idempotency keys. Seeded from the
    /// wall clock at construction and bumped per submission, so keys stay
    /// unique even when two submissions land in the same millisecond.
    direct_id: AtomicI64,
    notices_rx: Option<mpsc::Receiver<PermanentFailure>>,
}

impl<S, T> SyncSession<S, T>
where
    S: ActionStore,
    T: Transport,
{
    /// Creates a new session in the not-started state.
    pub fn new(config: AppConfig, store: S, transport: T) -> Self {
        // Registering here spares embedders from having to call it; the
        // registration is guarded and safe to run multiple times.
        register_metrics();

        let (shutdown_tx, _) = create_shutdown_channel();
        let (capability_tx, _) = watch::channel(true);

        let submit_retry = RetryPolicy::from_config(&config.submit_retry);
        let drain_retry = RetryPolicy::from_config(&config.drain_retry);

        Self {
            config: Arc::new(config),
            store,
            transport: Some(transport),
            state: SessionState::NotStarted,
            shutdown_tx,
            capability_tx,
            network_capable: true,
            foreground: true,
            submit_retry,
            drain_retry,
            direct_id: AtomicI64::new(Utc::now().timestamp_millis()),
            notices_rx: None,
        }
    }

    /// Returns a handle for sending shutdown signals to this session.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Starts the connection manager and the sync coordinator.
    pub async fn start(&mut self) -> SyncResult<()> {
        if matches!(self.state, SessionState::Started { .. }) {
            bail!(ErrorKind::InvalidState, "Session is already started");
        }

        let Some(transport) = self.transport.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Session cannot be restarted",
                "a shut down session must be rebuilt, not restarted"
            );
        };

        info!(
            host = %self.config.connection.host,
            port = self.config.connection.port,
            "starting sync session"
        );

        let connection = ConnectionManager::new(
            self.config.connection.clone(),
            transport,
            self.capability_tx.subscribe(),
            self.shutdown_tx.subscribe(),
        )
        .start()
        .await?;
        let client = connection.client();

        let (notices_tx, notices_rx) = mpsc::channel(NOTICE_CHANNEL_CAPACITY);
        self.notices_rx = Some(notices_rx);

        let coordinator = SyncCoordinator::new(
            self.store.clone(),
            client.clone(),
            self.drain_retry.clone(),
            notices_tx,
            self.shutdown_tx.subscribe(),
        )
        .start()
        .await?;

        self.state = SessionState::Started {
            connection,
            coordinator,
            client,
        };

        Ok(())
    }

    /// Submits a state-changing user action.
    ///
    /// While connected, the action is delivered directly under the bounded
    /// online retry policy. When the session is offline, or when the online
    /// retries exhaust on a transient failure, the action is durably queued
    /// and replayed by the coordinator on the next connection — reusing the
    /// idempotency key already sent, so the server treats the replay as a
    /// duplicate. Terminal rejections propagate to the caller immediately.
    pub async fn submit(
        &self,
        action_type: ActionType,
        payload: impl Into<String>,
    ) -> SyncResult<Submission> {
        let payload = payload.into();

        let SessionState::Started { client, .. } = &self.state else {
            bail!(ErrorKind::InvalidState, "Session is not started");
        };

        if !client.state().is_connected() {
            let queued = self
                .store
                .enqueue(NewAction::new(action_type, payload))
                .await?;
            info!(id = queued.id, "offline, action queued");

            return Ok(Submission::Queued(queued));
        }

        // The key must be derived before the first send so the queued replay
        // after a failed direct attempt reuses it. The counter is clock-seeded
        // but advances per submission, so back-to-back submissions of the same
        // type never share a key and never get deduplicated by the server.
        let idempotency_key =
            action_type.derive_key(self.direct_id.fetch_add(1, Ordering::Relaxed));
        let request = DeliveryRequest {
            idempotency_key: idempotency_key.clone(),
            action_type,
            payload: payload.clone(),
        };

        let result = execute_with_retry(&self.submit_retry, self.shutdown_tx.subscribe(), || {
            client.deliver(request.clone())
        })
        .await;

        match result {
            Ok(_) => Ok(Submission::Delivered),
            Err(err) if err.kind().is_retryable() || err.kind() == ErrorKind::ConnectionClosed => {
                // Transient trouble: fall back to the durable queue with the
                // key the server may already have seen.
                let queued = self
                    .store
                    .enqueue(NewAction {
                        action_type,
                        payload,
                        idempotency_key: Some(idempotency_key),
                    })
                    .await?;
                info!(id = queued.id, "direct delivery failed, action queued");

                Ok(Submission::Queued(queued))
            }
            Err(err) => Err(err),
        }
    }

    /// Number of actions waiting in the durable queue.
    pub async fn queue_depth(&self) -> SyncResult<usize> {
        self.store.len().await
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        match &self.state {
            SessionState::Started { client, .. } => client.state(),
            SessionState::NotStarted => ConnectionState::Disconnected,
        }
    }

    /// Subscribes to the ordered stream of connection state transitions.
    pub fn subscribe_states(&self) -> SyncResult<broadcast::Receiver<ConnectionState>> {
        let SessionState::Started { client, .. } = &self.state else {
            bail!(ErrorKind::InvalidState, "Session is not started");
        };

        Ok(client.subscribe_states())
    }

    /// Subscribes to unsolicited server events (ride status, chat, location).
    pub fn subscribe_events(&self) -> SyncResult<broadcast::Receiver<ServerEvent>> {
        let SessionState::Started { client, .. } = &self.state else {
            bail!(ErrorKind::InvalidState, "Session is not started");
        };

        Ok(client.subscribe_events())
    }

    /// Takes the stream of permanently failed actions. Can be taken once.
    pub fn notices(&mut self) -> Option<mpsc::Receiver<PermanentFailure>> {
        self.notices_rx.take()
    }

    /// Suspends reconnect scheduling, e.g. when the application is
    /// backgrounded. An established connection is left alone; in-flight queue
    /// state is untouched.
    pub fn pause(&mut self) {
        self.foreground = false;
        self.update_gate();
    }

    /// Resumes reconnect scheduling after [`SyncSession::pause`].
    pub fn resume(&mut self) {
        self.foreground = true;
        self.update_gate();
    }

    /// Reports the device's network capability, as observed by the embedder's
    /// connectivity callbacks. While `false`, reconnect attempts pause.
    pub fn set_network_capability(&mut self, capable: bool) {
        self.network_capable = capable;
        self.update_gate();
    }

    fn update_gate(&self) {
        let wanted = self.foreground && self.network_capable;
        // send_replace updates the value even before the manager has
        // subscribed, so gating applied before start() is not lost.
        self.capability_tx.send_replace(wanted);
    }

    /// Waits for the session workers to terminate.
    ///
    /// If any worker encounters an error, the errors are collected and
    /// returned after all workers have stopped.
    pub async fn wait(self) -> SyncResult<()> {
        let SessionState::Started {
            connection,
            coordinator,
            ..
        } = self.state
        else {
            info!("session was not started, nothing to wait for");

            return Ok(());
        };

        let mut errors = vec![];

        // The connection manager owns the link; once it stops, the
        // coordinator observes `Closed` and stops on its own.
        if let Err(err) = connection.wait().await {
            // Make sure the coordinator is not left waiting for state
            // transitions that will never come.
            let _ = self.shutdown_tx.shutdown();
            errors.push(err);
        }

        if let Err(err) = coordinator.wait().await {
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    /// Initiates graceful shutdown without waiting for termination.
    pub fn shutdown(&self) {
        info!("trying to shut down the sync session");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the session: {}", err);
            return;
        }

        info!("shutdown signal successfully sent to all workers");
    }

    /// Initiates shutdown and waits for complete termination.
    pub async fn shutdown_and_wait(self) -> SyncResult<()> {
        self.shutdown();
        self.wait().await
    }
}
