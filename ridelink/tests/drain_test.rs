#![cfg(feature = "test-utils")]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use ridelink::concurrency::shutdown::create_shutdown_channel;
use ridelink::connection::frame::{AckOutcome, Frame};
use ridelink::connection::manager::{ConnectionManager, ConnectionManagerHandle};
use ridelink::coordinator::{PermanentFailure, SyncCoordinator, SyncCoordinatorHandle};
use ridelink::error::ErrorKind;
use ridelink::queue::action::{ActionType, NewAction};
use ridelink::queue::store::base::ActionStore;
use ridelink::queue::store::memory::MemoryActionStore;
use ridelink::retry::RetryPolicy;
use ridelink::test_utils::store::{FaultConfig, FaultInjectingStore, FaultType};
use ridelink::test_utils::transport::{ScriptedReply, ScriptedTransport, recording_responder};
use ridelink::workers::base::{Worker, WorkerHandle};
use ridelink_telemetry::tracing::init_test_tracing;
use tokio::sync::{mpsc, watch};

use crate::common::{test_app_config, wait_for_depth, wait_for_empty_queue};

struct Harness {
    store: MemoryActionStore,
    connection: ConnectionManagerHandle,
    coordinator: SyncCoordinatorHandle,
    notices_rx: mpsc::Receiver<PermanentFailure>,
    shutdown_tx: ridelink::concurrency::shutdown::ShutdownTx,
    _capability_tx: watch::Sender<bool>,
}

impl Harness {
    async fn start(store: MemoryActionStore, transport: ScriptedTransport) -> Self {
        let config = test_app_config();
        let (capability_tx, capability_rx) = watch::channel(true);
        let (shutdown_tx, _) = create_shutdown_channel();

        let connection = ConnectionManager::new(
            config.connection.clone(),
            transport,
            capability_rx,
            shutdown_tx.subscribe(),
        )
        .start()
        .await
        .unwrap();

        let (notices_tx, notices_rx) = mpsc::channel(16);
        let coordinator = SyncCoordinator::new(
            store.clone(),
            connection.client(),
            RetryPolicy::from_config(&config.drain_retry),
            notices_tx,
            shutdown_tx.subscribe(),
        )
        .start()
        .await
        .unwrap();

        Self {
            store,
            connection,
            coordinator,
            notices_rx,
            shutdown_tx,
            _capability_tx: capability_tx,
        }
    }

    async fn shutdown(self) {
        self.shutdown_tx.shutdown().unwrap();
        self.connection.wait().await.unwrap();
        self.coordinator.wait().await.unwrap();
    }
}

async fn enqueue_messages(store: &MemoryActionStore, count: usize) -> Vec<String> {
    let mut keys = Vec::new();
    for i in 0..count {
        let queued = store
            .enqueue(NewAction::new(
                ActionType::SendMessage,
                format!(r#"{{"text":"m{i}"}}"#),
            ))
            .await
            .unwrap();
        keys.push(queued.idempotency_key);
    }

    keys
}

#[tokio::test(start_paused = true)]
async fn test_queued_actions_are_delivered_in_order_exactly_once() {
    init_test_tracing();

    let store = MemoryActionStore::new();
    let keys = enqueue_messages(&store, 3).await;

    let delivered = Arc::new(StdMutex::new(Vec::new()));
    let transport = ScriptedTransport::new().on_frame(recording_responder(delivered.clone()));

    let harness = Harness::start(store.clone(), transport).await;
    wait_for_empty_queue(&store).await;

    assert_eq!(*delivered.lock().unwrap(), keys);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminal_rejection_removes_action_and_continues_the_pass() {
    init_test_tracing();

    let store = MemoryActionStore::new();
    let keys = enqueue_messages(&store, 3).await;

    let delivered = Arc::new(StdMutex::new(Vec::new()));
    let rejected_key = keys[1].clone();
    let delivered_clone = delivered.clone();
    let transport = ScriptedTransport::new().on_frame(move |frame| match frame {
        Frame::Action {
            idempotency_key, ..
        } => {
            delivered_clone.lock().unwrap().push(idempotency_key.clone());

            let outcome = if *idempotency_key == rejected_key {
                AckOutcome::Rejected {
                    code: 400,
                    reason: "invalid payload".to_owned(),
                }
            } else {
                AckOutcome::Accepted
            };

            ScriptedReply::Frames(vec![Frame::Ack {
                idempotency_key: idempotency_key.clone(),
                outcome,
            }])
        }
        Frame::Heartbeat { seq } => {
            ScriptedReply::Frames(vec![Frame::HeartbeatAck { seq: *seq }])
        }
        _ => ScriptedReply::Frames(Vec::new()),
    });

    let mut harness = Harness::start(store.clone(), transport).await;
    wait_for_empty_queue(&store).await;

    // All three were attempted in order; the rejected one was dropped and
    // surfaced, the pass continued past it.
    assert_eq!(*delivered.lock().unwrap(), keys);
    let notice = harness.notices_rx.recv().await.unwrap();
    assert_eq!(notice.action.idempotency_key, keys[1]);
    assert_eq!(notice.error.kind(), ErrorKind::BadRequest);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retryable_exhaustion_halts_the_pass_and_keeps_the_queue() {
    init_test_tracing();

    let store = MemoryActionStore::new();
    let keys = enqueue_messages(&store, 3).await;

    let delivered = Arc::new(StdMutex::new(Vec::new()));
    let delivered_clone = delivered.clone();
    // The server is overloaded: every action is rejected with a retryable
    // status.
    let transport = ScriptedTransport::new().on_frame(move |frame| match frame {
        Frame::Action {
            idempotency_key, ..
        } => {
            delivered_clone.lock().unwrap().push(idempotency_key.clone());

            ScriptedReply::Frames(vec![Frame::Ack {
                idempotency_key: idempotency_key.clone(),
                outcome: AckOutcome::Rejected {
                    code: 503,
                    reason: "overloaded".to_owned(),
                },
            }])
        }
        Frame::Heartbeat { seq } => {
            ScriptedReply::Frames(vec![Frame::HeartbeatAck { seq: *seq }])
        }
        _ => ScriptedReply::Frames(Vec::new()),
    });

    let harness = Harness::start(store.clone(), transport).await;

    // Wait until the first action's exhaustion is persisted.
    let attempts_recorded = async {
        loop {
            let pending = store.list_pending().await.unwrap();
            if pending[0].attempt_count > 0 {
                return pending;
            }

            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    };
    let pending = tokio::time::timeout(std::time::Duration::from_secs(120), attempts_recorded)
        .await
        .unwrap();

    // Nothing was removed, later actions were never attempted, and the first
    // action was tried exactly drain_retry.max_attempts times.
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].attempt_count, 1);
    assert_eq!(*delivered.lock().unwrap(), vec![keys[0].clone(), keys[0].clone()]);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mid_drain_disconnect_aborts_and_resumes_on_reconnect() {
    init_test_tracing();

    let store = MemoryActionStore::new();
    let keys = enqueue_messages(&store, 3).await;

    let delivered = Arc::new(StdMutex::new(Vec::new()));
    let delivered_clone = delivered.clone();
    let dropped_once = Arc::new(AtomicBool::new(false));
    let dropped_clone = dropped_once.clone();
    let drop_key = keys[1].clone();
    // The link dies while the second action is in flight, once.
    let transport = ScriptedTransport::new().on_frame(move |frame| match frame {
        Frame::Action {
            idempotency_key, ..
        } => {
            delivered_clone.lock().unwrap().push(idempotency_key.clone());

            if *idempotency_key == drop_key
                && !dropped_clone.swap(true, Ordering::SeqCst)
            {
                return ScriptedReply::Drop;
            }

            ScriptedReply::Frames(vec![Frame::Ack {
                idempotency_key: idempotency_key.clone(),
                outcome: AckOutcome::Accepted,
            }])
        }
        Frame::Heartbeat { seq } => {
            ScriptedReply::Frames(vec![Frame::HeartbeatAck { seq: *seq }])
        }
        _ => ScriptedReply::Frames(Vec::new()),
    });

    let harness = Harness::start(store.clone(), transport).await;
    wait_for_empty_queue(&store).await;

    // The second action was redelivered with the same idempotency key after
    // the reconnect; the server-side replay is a no-op by contract.
    let delivered = delivered.lock().unwrap().clone();
    assert_eq!(
        delivered,
        vec![
            keys[0].clone(),
            keys[1].clone(),
            keys[1].clone(),
            keys[2].clone()
        ]
    );

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_actions_enqueued_while_connected_drain_on_next_connection() {
    init_test_tracing();

    let store = MemoryActionStore::new();

    let delivered = Arc::new(StdMutex::new(Vec::new()));
    let transport = ScriptedTransport::new().on_frame(recording_responder(delivered.clone()));

    let harness = Harness::start(store.clone(), transport.clone()).await;
    let mut states = harness.connection.client().subscribe_states();
    common::collect_states_until(
        &mut states,
        ridelink::connection::state::ConnectionStateType::Connected,
    )
    .await;

    // Enqueue after the initial connection, then kill the link; the reconnect
    // triggers a fresh pass that picks the action up.
    let queued = store
        .enqueue(NewAction::new(ActionType::RateRide, r#"{"stars":5}"#))
        .await
        .unwrap();
    transport.last_connection().unwrap().server_close();

    wait_for_empty_queue(&store).await;
    assert!(delivered.lock().unwrap().contains(&queued.idempotency_key));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_during_drain_stops_the_coordinator() {
    init_test_tracing();

    let inner = MemoryActionStore::new();
    enqueue_messages(&inner, 1).await;

    let store = FaultInjectingStore::wrap(
        inner,
        FaultConfig {
            list_pending: Some(FaultType::Error),
            ..Default::default()
        },
    );

    let config = test_app_config();
    let (_capability_tx, capability_rx) = watch::channel(true);
    let (shutdown_tx, _) = create_shutdown_channel();

    let connection = ConnectionManager::new(
        config.connection.clone(),
        ScriptedTransport::new(),
        capability_rx,
        shutdown_tx.subscribe(),
    )
    .start()
    .await
    .unwrap();

    let (notices_tx, _notices_rx) = mpsc::channel(16);
    let coordinator = SyncCoordinator::new(
        store,
        connection.client(),
        RetryPolicy::from_config(&config.drain_retry),
        notices_tx,
        shutdown_tx.subscribe(),
    )
    .start()
    .await
    .unwrap();

    // The first drain pass hits the injected storage fault and the
    // coordinator stops with it.
    let err = coordinator.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageError);

    shutdown_tx.shutdown().unwrap();
    connection.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_while_disconnected() {
    init_test_tracing();

    let store = MemoryActionStore::new();
    enqueue_messages(&store, 2).await;

    // Connects never succeed; the queue must stay intact.
    let transport = ScriptedTransport::new().fail_connects(u32::MAX);
    let harness = Harness::start(store.clone(), transport).await;

    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    wait_for_depth(&store, 2).await;

    harness.shutdown().await;
}
