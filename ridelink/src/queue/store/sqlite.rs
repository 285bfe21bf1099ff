use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::prelude::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::SyncResult;
use crate::queue::action::{ActionType, NewAction, QueuedAction};
use crate::queue::store::base::ActionStore;

// Sqlite allows a single writer; a one-connection pool turns the database
// handle into the single-writer discipline the queue requires.
const NUM_POOL_CONNECTIONS: u32 = 1;

#[derive(Debug, FromRow)]
struct PendingActionRow {
    id: i64,
    action_type: String,
    payload: String,
    enqueued_at: i64,
    attempt_count: i64,
    idempotency_key: String,
}

impl TryFrom<PendingActionRow> for QueuedAction {
    type Error = crate::error::SyncError;

    fn try_from(row: PendingActionRow) -> Result<Self, Self::Error> {
        Ok(QueuedAction {
            id: row.id,
            action_type: ActionType::from_str(&row.action_type)?,
            payload: row.payload,
            enqueued_at: row.enqueued_at,
            attempt_count: row.attempt_count as u32,
            idempotency_key: row.idempotency_key,
        })
    }
}

/// [`ActionStore`] persisted in a local sqlite database.
///
/// This is the production store: the queue is the source of truth for actions
/// taken while disconnected, so it must survive a process restart.
#[derive(Debug, Clone)]
pub struct SqliteActionStore {
    pool: SqlitePool,
}

impl SqliteActionStore {
    /// Opens (creating if needed) the database at `path` and runs the schema
    /// migration.
    pub async fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .min_connections(NUM_POOL_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            create table if not exists pending_actions (
                id integer primary key autoincrement,
                action_type text not null,
                payload text not null,
                enqueued_at integer not null,
                attempt_count integer not null default 0,
                idempotency_key text not null
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(path = %path.as_ref().display(), "opened sqlite action store");

        Ok(Self { pool })
    }
}

impl ActionStore for SqliteActionStore {
    async fn enqueue(&self, action: NewAction) -> SyncResult<QueuedAction> {
        let enqueued_at = Utc::now().timestamp_millis();
        let action_type = action.action_type;

        // The insert and the key backfill commit together. An action must
        // never hit the disk without its idempotency key, or a crash in
        // between would replay it with an empty one.
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            insert into pending_actions (action_type, payload, enqueued_at, attempt_count, idempotency_key)
            values ($1, $2, $3, 0, '')
            returning id
            "#,
        )
        .bind(action_type.to_string())
        .bind(&action.payload)
        .bind(enqueued_at)
        .fetch_one(&mut *tx)
        .await?;

        let idempotency_key = action
            .idempotency_key
            .unwrap_or_else(|| action_type.derive_key(id));
        sqlx::query("update pending_actions set idempotency_key = $1 where id = $2")
            .bind(&idempotency_key)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(QueuedAction {
            id,
            action_type,
            payload: action.payload,
            enqueued_at,
            attempt_count: 0,
            idempotency_key,
        })
    }

    async fn list_pending(&self) -> SyncResult<Vec<QueuedAction>> {
        let rows = sqlx::query_as::<_, PendingActionRow>(
            r#"
            select id, action_type, payload, enqueued_at, attempt_count, idempotency_key
            from pending_actions
            order by enqueued_at asc, id asc
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueuedAction::try_from).collect()
    }

    async fn increment_attempts(&self, id: i64) -> SyncResult<()> {
        sqlx::query("update pending_actions set attempt_count = attempt_count + 1 where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn remove(&self, id: i64) -> SyncResult<bool> {
        let result = sqlx::query("delete from pending_actions where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn len(&self) -> SyncResult<usize> {
        let count: i64 = sqlx::query_scalar("select count(*) from pending_actions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn open_store(dir: &TempDir) -> SqliteActionStore {
        SqliteActionStore::open(dir.path().join("queue.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_and_list_orders_by_enqueue_time_then_id() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .enqueue(NewAction::new(ActionType::SendMessage, r#"{"text":"a"}"#))
            .await
            .unwrap();
        store
            .enqueue(NewAction::new(ActionType::SendMessage, r#"{"text":"b"}"#))
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].id < pending[1].id);
        assert!(pending[0].enqueued_at <= pending[1].enqueued_at);
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = TempDir::new().unwrap();

        let queued = {
            let store = open_store(&dir).await;
            let queued = store
                .enqueue(NewAction::new(ActionType::RateRide, r#"{"stars":5}"#))
                .await
                .unwrap();
            store.increment_attempts(queued.id).await.unwrap();
            queued
        };

        let reopened = open_store(&dir).await;
        let pending = reopened.list_pending().await.unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, queued.id);
        // The key commits atomically with the row; a persisted action must
        // never come back with the placeholder empty key.
        assert!(!pending[0].idempotency_key.is_empty());
        assert_eq!(pending[0].idempotency_key, queued.idempotency_key);
        assert_eq!(pending[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_remove_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let queued = store
            .enqueue(NewAction::new(ActionType::CancelRide, "{}"))
            .await
            .unwrap();

        assert!(store.remove(queued.id).await.unwrap());
        assert!(!store.remove(queued.id).await.unwrap());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_precomputed_key_is_preserved() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let action = NewAction {
            action_type: ActionType::UpdateProfile,
            payload: "{}".to_string(),
            idempotency_key: Some("update_profile-123456".to_string()),
        };
        let queued = store.enqueue(action).await.unwrap();

        assert_eq!(queued.idempotency_key, "update_profile-123456");
    }
}
