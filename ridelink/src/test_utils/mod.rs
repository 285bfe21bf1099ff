//! Deterministic test doubles for exercising the connection manager and the
//! sync coordinator without a real server.

pub mod store;
pub mod transport;
