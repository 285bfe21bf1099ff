use std::future::Future;

use crate::error::SyncResult;
use crate::queue::action::{NewAction, QueuedAction};

/// Durable store of pending user actions.
///
/// The store is the source of truth for what the user did while disconnected.
/// Implementations serialize concurrent enqueues and removals internally and
/// must never interleave partial writes. Every method is local-only and never
/// blocks on the network; storage failures surface as
/// [`crate::error::ErrorKind::StorageError`] and are never retried
/// automatically.
pub trait ActionStore: Clone + Send + Sync + 'static {
    /// Durably appends an action and returns the persisted record with its
    /// assigned id and idempotency key.
    fn enqueue(&self, action: NewAction) -> impl Future<Output = SyncResult<QueuedAction>> + Send;

    /// Returns all pending actions ordered by `enqueued_at` ascending, ties
    /// broken by `id` ascending.
    fn list_pending(&self) -> impl Future<Output = SyncResult<Vec<QueuedAction>>> + Send;

    /// Increments the attempt count of a pending action. Missing ids are a
    /// no-op.
    fn increment_attempts(&self, id: i64) -> impl Future<Output = SyncResult<()>> + Send;

    /// Removes a pending action. Returns `false` if the id was not present,
    /// so a duplicate removal is an observable no-op.
    fn remove(&self, id: i64) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Number of pending actions.
    fn len(&self) -> impl Future<Output = SyncResult<usize>> + Send;
}
