use std::sync::Arc;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::queue::action::{NewAction, QueuedAction};
use crate::queue::store::base::ActionStore;
use crate::sync_error;

#[derive(Debug, Clone)]
pub enum FaultType {
    Panic,
    Error,
}

/// Per-operation faults. [`None`] leaves the operation untouched.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    pub enqueue: Option<FaultType>,
    pub list_pending: Option<FaultType>,
    pub increment_attempts: Option<FaultType>,
    pub remove: Option<FaultType>,
}

/// An [`ActionStore`] wrapper that injects storage faults into chosen
/// operations, for exercising the storage failure paths.
#[derive(Debug, Clone)]
pub struct FaultInjectingStore<S>
where
    S: Clone,
{
    inner: S,
    config: Arc<FaultConfig>,
}

impl<S> FaultInjectingStore<S>
where
    S: Clone,
{
    pub fn wrap(inner: S, config: FaultConfig) -> Self {
        Self {
            inner,
            config: Arc::new(config),
        }
    }

    pub fn get_inner(&self) -> &S {
        &self.inner
    }

    fn trigger_fault(&self, fault: &Option<FaultType>) -> SyncResult<()> {
        if let Some(fault_type) = fault {
            match fault_type {
                FaultType::Panic => panic!("Fault injection: panic triggered"),
                FaultType::Error => {
                    return Err(sync_error!(
                        ErrorKind::StorageError,
                        "Fault injection: storage error triggered"
                    ));
                }
            }
        }

        Ok(())
    }
}

impl<S> ActionStore for FaultInjectingStore<S>
where
    S: ActionStore,
{
    async fn enqueue(&self, action: NewAction) -> SyncResult<QueuedAction> {
        self.trigger_fault(&self.config.enqueue)?;
        self.inner.enqueue(action).await
    }

    async fn list_pending(&self) -> SyncResult<Vec<QueuedAction>> {
        self.trigger_fault(&self.config.list_pending)?;
        self.inner.list_pending().await
    }

    async fn increment_attempts(&self, id: i64) -> SyncResult<()> {
        self.trigger_fault(&self.config.increment_attempts)?;
        self.inner.increment_attempts(id).await
    }

    async fn remove(&self, id: i64) -> SyncResult<bool> {
        self.trigger_fault(&self.config.remove)?;
        self.inner.remove(id).await
    }

    async fn len(&self) -> SyncResult<usize> {
        self.inner.len().await
    }
}
