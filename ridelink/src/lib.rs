//! Resilient connectivity and synchronization core for a ride-hailing client.
//!
//! The crate owns four cooperating pieces: a generic retry executor with
//! exponential backoff, a failure classifier that decides which outcomes are
//! worth retrying, a connection manager that keeps one persistent
//! bidirectional connection alive across network flaps, and a durable action
//! queue drained in order by a sync coordinator once connectivity returns.
//! [`session::SyncSession`] ties them together behind a single facade.

pub mod classify;
pub mod concurrency;
pub mod connection;
pub mod coordinator;
pub mod error;
mod macros;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod workers;
