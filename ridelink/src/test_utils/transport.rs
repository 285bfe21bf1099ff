use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, mpsc, watch};

use crate::connection::frame::{AckOutcome, Frame};
use crate::connection::transport::{Transport, TransportConnection};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;

/// What a scripted server does in response to a client frame.
pub enum ScriptedReply {
    /// Push these frames to the client.
    Frames(Vec<Frame>),
    /// Close the link, as a server-side drop would.
    Drop,
}

type Responder = Arc<dyn Fn(&Frame) -> ScriptedReply + Send + Sync>;

/// A [`Transport`] driven by a script instead of a network.
///
/// `connect` fails a configured number of times before succeeding; every
/// produced connection answers client frames through a shared responder
/// closure. The default responder acks heartbeats and accepts every action.
#[derive(Clone)]
pub struct ScriptedTransport {
    remaining_connect_failures: Arc<AtomicU32>,
    connect_failure_kind: Arc<StdMutex<ErrorKind>>,
    connect_attempts: Arc<AtomicU32>,
    responder: Responder,
    last_connection: Arc<StdMutex<Option<ScriptedConnection>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            remaining_connect_failures: Arc::new(AtomicU32::new(0)),
            connect_failure_kind: Arc::new(StdMutex::new(ErrorKind::Network)),
            connect_attempts: Arc::new(AtomicU32::new(0)),
            responder: Arc::new(default_responder),
            last_connection: Arc::new(StdMutex::new(None)),
        }
    }

    /// Makes the next `failures` connect attempts fail with a network error.
    pub fn fail_connects(self, failures: u32) -> Self {
        self.remaining_connect_failures
            .store(failures, Ordering::SeqCst);
        self
    }

    /// Changes the kind the scripted connect failures carry.
    pub fn connect_failure_kind(self, kind: ErrorKind) -> Self {
        *self.connect_failure_kind.lock().unwrap() = kind;
        self
    }

    /// Replaces the responder deciding how the scripted server answers each
    /// client frame.
    pub fn on_frame<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Frame) -> ScriptedReply + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Total connect attempts observed, including failed ones.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// The most recently produced connection, if any.
    pub fn last_connection(&self) -> Option<ScriptedConnection> {
        self.last_connection.lock().unwrap().clone()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ScriptedTransport {
    type Conn = ScriptedConnection;

    fn name() -> &'static str {
        "scripted"
    }

    async fn connect(&self) -> SyncResult<ScriptedConnection> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.remaining_connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_connect_failures
                .store(remaining - 1, Ordering::SeqCst);
            let kind = *self.connect_failure_kind.lock().unwrap();

            return Err(sync_error!(
                kind,
                "Scripted connect failure",
                format!("{} scripted failures remaining", remaining - 1)
            ));
        }

        let connection = ScriptedConnection::new(self.responder.clone());
        *self.last_connection.lock().unwrap() = Some(connection.clone());

        Ok(connection)
    }
}

/// The answering half of a [`ScriptedTransport`] link.
#[derive(Clone)]
pub struct ScriptedConnection {
    inbound_tx: mpsc::UnboundedSender<Frame>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    sent: Arc<StdMutex<Vec<Frame>>>,
    responder: Responder,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl ScriptedConnection {
    fn new(responder: Responder) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            sent: Arc::new(StdMutex::new(Vec::new())),
            responder,
            closed_tx: Arc::new(closed_tx),
        }
    }

    /// Every frame the client sent over this link, in order.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    /// Pushes an unsolicited server frame to the client.
    pub fn push_inbound(&self, frame: Frame) {
        let _ = self.inbound_tx.send(frame);
    }

    /// Drops the link from the server side; the client's next receive
    /// observes a clean close.
    pub fn server_close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

impl TransportConnection for ScriptedConnection {
    async fn send(&self, frame: Frame) -> SyncResult<()> {
        self.sent.lock().unwrap().push(frame.clone());

        match (self.responder)(&frame) {
            ScriptedReply::Frames(replies) => {
                for reply in replies {
                    let _ = self.inbound_tx.send(reply);
                }
            }
            ScriptedReply::Drop => self.server_close(),
        }

        Ok(())
    }

    async fn recv(&self) -> SyncResult<Option<Frame>> {
        let mut closed_rx = self.closed_tx.subscribe();
        if *closed_rx.borrow() {
            return Ok(None);
        }

        let mut inbound = self.inbound_rx.lock().await;

        tokio::select! {
            _ = closed_rx.changed() => Ok(None),
            frame = inbound.recv() => Ok(frame),
        }
    }

    async fn close(&self) -> SyncResult<()> {
        self.server_close();

        Ok(())
    }
}

/// Acks heartbeats, accepts every action, ignores everything else.
pub fn default_responder(frame: &Frame) -> ScriptedReply {
    match frame {
        Frame::Heartbeat { seq } => ScriptedReply::Frames(vec![Frame::HeartbeatAck { seq: *seq }]),
        Frame::Action {
            idempotency_key, ..
        } => ScriptedReply::Frames(vec![Frame::Ack {
            idempotency_key: idempotency_key.clone(),
            outcome: AckOutcome::Accepted,
        }]),
        _ => ScriptedReply::Frames(Vec::new()),
    }
}

/// Accepts actions, recording each delivered idempotency key so tests can
/// assert order and at-least-once delivery.
pub fn recording_responder(delivered: Arc<StdMutex<Vec<String>>>) -> impl Fn(&Frame) -> ScriptedReply {
    move |frame| match frame {
        Frame::Action {
            idempotency_key, ..
        } => {
            delivered.lock().unwrap().push(idempotency_key.clone());

            ScriptedReply::Frames(vec![Frame::Ack {
                idempotency_key: idempotency_key.clone(),
                outcome: AckOutcome::Accepted,
            }])
        }
        Frame::Heartbeat { seq } => ScriptedReply::Frames(vec![Frame::HeartbeatAck { seq: *seq }]),
        _ => ScriptedReply::Frames(Vec::new()),
    }
}
