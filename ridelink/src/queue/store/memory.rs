use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::queue::action::{NewAction, QueuedAction};
use crate::queue::store::base::ActionStore;

#[derive(Debug)]
struct Inner {
    next_id: i64,
    actions: BTreeMap<i64, QueuedAction>,
}

/// In-memory [`ActionStore`], mainly for tests and ephemeral sessions.
///
/// Does not survive a process restart; production sessions use the sqlite
/// store.
#[derive(Debug, Clone)]
pub struct MemoryActionStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryActionStore {
    pub fn new() -> Self {
        let inner = Inner {
            next_id: 1,
            actions: BTreeMap::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }
}

impl Default for MemoryActionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionStore for MemoryActionStore {
    async fn enqueue(&self, action: NewAction) -> SyncResult<QueuedAction> {
        let mut inner = self.inner.lock().await;

        let id = inner.next_id;
        inner.next_id += 1;

        let idempotency_key = action
            .idempotency_key
            .unwrap_or_else(|| action.action_type.derive_key(id));
        let queued = QueuedAction {
            id,
            action_type: action.action_type,
            payload: action.payload,
            enqueued_at: Utc::now().timestamp_millis(),
            attempt_count: 0,
            idempotency_key,
        };

        inner.actions.insert(id, queued.clone());

        Ok(queued)
    }

    async fn list_pending(&self) -> SyncResult<Vec<QueuedAction>> {
        let inner = self.inner.lock().await;

        let mut pending: Vec<_> = inner.actions.values().cloned().collect();
        pending.sort_by_key(|action| (action.enqueued_at, action.id));

        Ok(pending)
    }

    async fn increment_attempts(&self, id: i64) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(action) = inner.actions.get_mut(&id) {
            action.attempt_count += 1;
        }

        Ok(())
    }

    async fn remove(&self, id: i64) -> SyncResult<bool> {
        let mut inner = self.inner.lock().await;

        Ok(inner.actions.remove(&id).is_some())
    }

    async fn len(&self) -> SyncResult<usize> {
        let inner = self.inner.lock().await;

        Ok(inner.actions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::action::ActionType;

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_ids_and_derived_keys() {
        let store = MemoryActionStore::new();

        let first = store
            .enqueue(NewAction::new(ActionType::SendMessage, "{}"))
            .await
            .unwrap();
        let second = store
            .enqueue(NewAction::new(ActionType::RateRide, "{}"))
            .await
            .unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.idempotency_key, format!("send_message-{}", first.id));
        assert_eq!(first.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_precomputed_key_is_preserved() {
        let store = MemoryActionStore::new();

        let action = NewAction {
            action_type: ActionType::CancelRide,
            payload: "{}".to_string(),
            idempotency_key: Some("cancel_ride-999".to_string()),
        };
        let queued = store.enqueue(action).await.unwrap();

        assert_eq!(queued.idempotency_key, "cancel_ride-999");
    }

    #[tokio::test]
    async fn test_list_pending_orders_by_enqueue_time_then_id() {
        let store = MemoryActionStore::new();

        for _ in 0..3 {
            store
                .enqueue(NewAction::new(ActionType::SendMessage, "{}"))
                .await
                .unwrap();
        }

        let pending = store.list_pending().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|action| action.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_duplicate_remove_is_a_noop() {
        let store = MemoryActionStore::new();

        let queued = store
            .enqueue(NewAction::new(ActionType::RateRide, "{}"))
            .await
            .unwrap();

        assert!(store.remove(queued.id).await.unwrap());
        assert!(!store.remove(queued.id).await.unwrap());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_attempts_persists() {
        let store = MemoryActionStore::new();

        let queued = store
            .enqueue(NewAction::new(ActionType::UpdateProfile, "{}"))
            .await
            .unwrap();
        store.increment_attempts(queued.id).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending[0].attempt_count, 1);
    }
}
