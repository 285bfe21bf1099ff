use std::collections::HashMap;
use std::time::Duration;

use ridelink_config::shared::ConnectionConfig;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, warn};

use crate::classify::from_status;
use crate::concurrency::shutdown::ShutdownRx;
use crate::connection::frame::{AckOutcome, Frame};
use crate::connection::state::ConnectionState;
use crate::connection::transport::{Transport, TransportConnection};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::RECONNECTS_TOTAL;
use crate::queue::action::ActionType;
use crate::retry::backoff_delay;
use crate::sync_error;
use crate::workers::base::{Worker, WorkerHandle, WorkerType, wait_for_task};

/// Capacity of the state broadcast channel. A subscriber that falls further
/// behind than this observes a lag error and must resubscribe; the manager
/// itself never skips publishing a transition.
pub const STATE_CHANNEL_CAPACITY: usize = 64;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 128;

/// An unsolicited server push forwarded to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub event_type: String,
    pub payload: String,
}

/// One action to send over the live link and confirm by ack.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub idempotency_key: String,
    pub action_type: ActionType,
    pub payload: String,
}

enum Command {
    Deliver {
        request: DeliveryRequest,
        reply: oneshot::Sender<SyncResult<()>>,
    },
}

/// Owns the persistent connection and its reconnect state machine.
///
/// The manager runs as a single task that exclusively owns the connection
/// state; everything external observes it through the published state stream
/// and interacts through a [`ConnectionClient`].
#[derive(Debug)]
pub struct ConnectionManager<T> {
    config: ConnectionConfig,
    transport: T,
    capability_rx: watch::Receiver<bool>,
    shutdown_rx: ShutdownRx,
}

impl<T> ConnectionManager<T> {
    /// Builds a manager in the `Disconnected` state.
    ///
    /// `capability_rx` reports whether the link is wanted and the device has
    /// network capability; while it reads `false` the manager stops scheduling
    /// reconnect attempts.
    pub fn new(
        config: ConnectionConfig,
        transport: T,
        capability_rx: watch::Receiver<bool>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            config,
            transport,
            capability_rx,
            shutdown_rx,
        }
    }
}

impl<T> Worker<ConnectionManagerHandle, ConnectionState> for ConnectionManager<T>
where
    T: Transport,
{
    type Error = SyncError;

    async fn start(self) -> SyncResult<ConnectionManagerHandle> {
        info!(transport = T::name(), "starting connection manager");

        let (current_tx, current_rx) = watch::channel(ConnectionState::Disconnected);
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let client = ConnectionClient {
            ack_timeout: Duration::from_millis(self.config.ack_timeout_ms),
            command_tx,
            current_rx,
            state_tx: state_tx.clone(),
            events_tx: events_tx.clone(),
        };

        let runtime = ManagerRuntime {
            config: self.config,
            transport: self.transport,
            capability_rx: self.capability_rx,
            shutdown_rx: self.shutdown_rx,
            command_rx,
            current_tx,
            state_tx,
            events_tx,
        };

        let span = tracing::info_span!("connection_manager");
        let handle = tokio::spawn(runtime.run().instrument(span));

        Ok(ConnectionManagerHandle {
            client,
            handle: Some(handle),
        })
    }
}

#[derive(Debug)]
pub struct ConnectionManagerHandle {
    client: ConnectionClient,
    handle: Option<JoinHandle<SyncResult<()>>>,
}

impl ConnectionManagerHandle {
    /// Returns a cloneable client for delivering actions and subscribing to
    /// states and events.
    pub fn client(&self) -> ConnectionClient {
        self.client.clone()
    }
}

impl WorkerHandle<ConnectionState> for ConnectionManagerHandle {
    fn state(&self) -> ConnectionState {
        self.client.state()
    }

    async fn wait(mut self) -> SyncResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        wait_for_task(WorkerType::Connection, handle).await
    }
}

/// Cloneable interface to a running connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionClient {
    ack_timeout: Duration,
    command_tx: mpsc::Sender<Command>,
    current_rx: watch::Receiver<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ServerEvent>,
}

impl ConnectionClient {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.current_rx.borrow()
    }

    /// Watch over the current state, for callers that only need the latest
    /// value.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.current_rx.clone()
    }

    /// Subscribes to the ordered stream of state transitions.
    pub fn subscribe_states(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to unsolicited server events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events_tx.subscribe()
    }

    /// Sends one action over the live link and waits for the server's ack.
    ///
    /// Fails with `ConnectionClosed` when the link is down or drops before the
    /// ack arrives, with `RequestTimeout` when no ack arrives in time, and
    /// with the classified rejection kind when the server refuses the action.
    pub async fn deliver(&self, request: DeliveryRequest) -> SyncResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Deliver {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| {
                sync_error!(
                    ErrorKind::ConnectionClosed,
                    "Connection manager has stopped"
                )
            })?;

        match tokio::time::timeout(self.ack_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(sync_error!(
                ErrorKind::ConnectionClosed,
                "Connection dropped before the action was acknowledged"
            )),
            Err(_) => Err(sync_error!(
                ErrorKind::RequestTimeout,
                "Action was not acknowledged in time",
                format!("no ack within {}ms", self.ack_timeout.as_millis())
            )),
        }
    }
}

enum LinkOutcome {
    Shutdown,
    Dropped(SyncError),
}

struct ManagerRuntime<T: Transport> {
    config: ConnectionConfig,
    transport: T,
    capability_rx: watch::Receiver<bool>,
    shutdown_rx: ShutdownRx,
    command_rx: mpsc::Receiver<Command>,
    current_tx: watch::Sender<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ServerEvent>,
}

impl<T: Transport> ManagerRuntime<T> {
    async fn run(mut self) -> SyncResult<()> {
        let initial_delay = Duration::from_millis(self.config.reconnect.initial_delay_ms);
        let max_delay = Duration::from_millis(self.config.reconnect.max_delay_ms);
        let factor = self.config.reconnect.backoff_factor;

        // Consecutive failed connect attempts of the current reconnect cycle;
        // reset on every successful connect.
        let mut attempt: u32 = 0;

        loop {
            if !*self.capability_rx.borrow() {
                info!("network capability lost, pausing reconnect attempts");
                if self.wait_for_capability().await.is_none() {
                    self.publish(ConnectionState::Closed);
                    return Ok(());
                }
                info!("network capability restored, resuming reconnect attempts");
            }

            self.publish(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    self.publish(ConnectionState::Closed);
                    return Ok(());
                }
                connected = self.transport.connect() => connected,
            };

            match connected {
                Ok(connection) => {
                    attempt = 0;
                    self.publish(ConnectionState::Connected);

                    match self.run_connected(&connection).await {
                        LinkOutcome::Shutdown => {
                            let _ = connection.close().await;
                            self.publish(ConnectionState::Closed);
                            return Ok(());
                        }
                        LinkOutcome::Dropped(err) => {
                            warn!(error = %err, "connection dropped");
                        }
                    }
                }
                Err(err) if reconnect_eligible(err.kind()) => {
                    warn!(error = %err, "connect attempt failed");
                }
                Err(err) => {
                    // A terminal failure, e.g. a rejected credential. Further
                    // attempts would not change the outcome.
                    self.publish(ConnectionState::Closed);
                    return Err(err);
                }
            }

            attempt += 1;
            let next_delay = backoff_delay(initial_delay, max_delay, factor, attempt);
            self.publish(ConnectionState::Reconnecting {
                attempt,
                next_delay,
            });
            metrics::counter!(RECONNECTS_TOTAL).increment(1);

            if !self.wait_for_backoff(next_delay).await {
                self.publish(ConnectionState::Closed);
                return Ok(());
            }
        }
    }

    /// Waits out the backoff delay, answering delivery requests with a
    /// not-connected failure in the meantime. Returns `false` on shutdown.
    async fn wait_for_backoff(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => return false,
                _ = tokio::time::sleep_until(deadline) => return true,
                command = self.command_rx.recv() => {
                    if let Some(command) = command {
                        reject_while_disconnected(command);
                    }
                }
            }
        }
    }

    /// Blocks until the capability signal reads `true`. Returns [`None`] on
    /// shutdown.
    async fn wait_for_capability(&mut self) -> Option<()> {
        loop {
            if *self.capability_rx.borrow() {
                return Some(());
            }

            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => return None,
                changed = self.capability_rx.changed() => {
                    // A dropped capability sender means nobody gates us
                    // anymore; proceed rather than stall forever.
                    if changed.is_err() {
                        return Some(());
                    }
                }
                command = self.command_rx.recv() => {
                    if let Some(command) = command {
                        reject_while_disconnected(command);
                    }
                }
            }
        }
    }

    async fn run_connected(&mut self, connection: &T::Conn) -> LinkOutcome {
        let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let heartbeat_timeout = Duration::from_millis(self.config.heartbeat_timeout_ms);

        let mut pending_acks: HashMap<String, oneshot::Sender<SyncResult<()>>> = HashMap::new();
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        heartbeat.tick().await;

        let mut next_seq: u64 = 0;
        // Deadline for the oldest unacknowledged heartbeat, if any.
        let mut liveness_deadline: Option<Instant> = None;

        loop {
            let liveness = async {
                match liveness_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    // Dropping pending_acks cancels in-flight deliveries; their
                    // callers observe a closed-connection failure.
                    return LinkOutcome::Shutdown;
                }
                frame = connection.recv() => match frame {
                    Ok(Some(frame)) => {
                        self.handle_frame(
                            connection,
                            frame,
                            &mut pending_acks,
                            &mut liveness_deadline,
                        )
                        .await;
                    }
                    Ok(None) => {
                        return LinkOutcome::Dropped(sync_error!(
                            ErrorKind::ConnectionClosed,
                            "Server closed the connection"
                        ));
                    }
                    Err(err) => return LinkOutcome::Dropped(err),
                },
                command = self.command_rx.recv() => {
                    if let Some(Command::Deliver { request, reply }) = command {
                        let frame = Frame::Action {
                            idempotency_key: request.idempotency_key.clone(),
                            action_type: request.action_type,
                            payload: request.payload,
                        };

                        // Entries whose caller already timed out waiting for
                        // the ack are dead weight; drop them here.
                        pending_acks.retain(|_, pending| !pending.is_closed());

                        match connection.send(frame).await {
                            Ok(()) => {
                                pending_acks.insert(request.idempotency_key, reply);
                            }
                            Err(err) => {
                                let _ = reply.send(Err(sync_error!(
                                    ErrorKind::ConnectionClosed,
                                    "Connection dropped while sending the action"
                                )));
                                return LinkOutcome::Dropped(err);
                            }
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    next_seq += 1;
                    if let Err(err) = connection.send(Frame::Heartbeat { seq: next_seq }).await {
                        return LinkOutcome::Dropped(err);
                    }

                    if liveness_deadline.is_none() {
                        liveness_deadline = Some(Instant::now() + heartbeat_timeout);
                    }
                }
                _ = liveness => {
                    return LinkOutcome::Dropped(sync_error!(
                        ErrorKind::Network,
                        "Heartbeat timed out",
                        format!(
                            "no heartbeat ack within {}ms",
                            heartbeat_timeout.as_millis()
                        )
                    ));
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        connection: &T::Conn,
        frame: Frame,
        pending_acks: &mut HashMap<String, oneshot::Sender<SyncResult<()>>>,
        liveness_deadline: &mut Option<Instant>,
    ) {
        match frame {
            Frame::Ack {
                idempotency_key,
                outcome,
            } => match pending_acks.remove(&idempotency_key) {
                Some(reply) => {
                    let result = match outcome {
                        AckOutcome::Accepted => Ok(()),
                        AckOutcome::Rejected { code, reason } => Err(sync_error!(
                            from_status(code),
                            "Server rejected the action",
                            reason
                        )),
                    };
                    let _ = reply.send(result);
                }
                None => {
                    debug!(idempotency_key, "received ack with no pending delivery");
                }
            },
            Frame::HeartbeatAck { seq } => {
                debug!(seq, "heartbeat acknowledged");
                *liveness_deadline = None;
            }
            Frame::Heartbeat { seq } => {
                // Server-initiated probe; answer it.
                let _ = connection.send(Frame::HeartbeatAck { seq }).await;
            }
            Frame::Event {
                event_type,
                payload,
            } => {
                let _ = self.events_tx.send(ServerEvent {
                    event_type,
                    payload,
                });
            }
            Frame::Hello { .. } | Frame::Action { .. } => {
                debug!("ignoring unexpected client-bound frame");
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        info!(state = %state.as_type(), "connection state changed");
        let _ = self.current_tx.send(state);
        let _ = self.state_tx.send(state);
    }
}

fn reject_while_disconnected(command: Command) {
    let Command::Deliver { reply, .. } = command;
    let _ = reply.send(Err(sync_error!(
        ErrorKind::ConnectionClosed,
        "Not connected"
    )));
}

fn reconnect_eligible(kind: ErrorKind) -> bool {
    kind.is_retryable() || kind == ErrorKind::ConnectionClosed
}
