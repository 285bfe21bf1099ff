use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;

/// The type of worker that is currently running.
#[derive(Debug, Copy, Clone)]
pub enum WorkerType {
    Connection,
    Drain,
}

/// A trait for types that can be started as workers.
///
/// The generic parameter `H` represents the handle type that will be returned when the worker starts,
/// and `S` represents the state type that can be accessed through the handle.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type.
    type Error;

    /// Starts the worker and returns a future that resolves to a handle.
    ///
    /// The handle can be used to monitor and control the worker's execution.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// A handle to a running worker that provides access to its state and completion status.
///
/// The generic parameter `S` represents the type of state that can be accessed through this handle.
pub trait WorkerHandle<S> {
    /// Returns the current state of the worker.
    ///
    /// Note that the state of the worker is expected to NOT be tied with its lifetime, so if you
    /// hold a reference to the state, it won't say anything about the worker's status.
    fn state(&self) -> S;

    /// Returns a future that resolves when the worker completes.
    ///
    /// The future resolves to a [`Result`] indicating whether the worker completed successfully
    /// or encountered an error.
    fn wait(self) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Awaits a worker's [`JoinHandle`], converting a panic into a [`SyncError`].
pub(crate) async fn wait_for_task(
    worker_type: WorkerType,
    handle: JoinHandle<SyncResult<()>>,
) -> SyncResult<()> {
    match handle.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(sync_error!(
            ErrorKind::WorkerPanic,
            "A worker panicked",
            format!("worker {worker_type:?} panicked: {err}")
        )),
        Err(err) => Err(sync_error!(
            ErrorKind::WorkerPanic,
            "A worker was cancelled",
            format!("worker {worker_type:?} was cancelled: {err}")
        )),
    }
}
