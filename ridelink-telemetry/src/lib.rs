//! Telemetry initialization for ridelink applications.
//!
//! Sets up structured logging through `tracing`: pretty console output in
//! development, JSON logs to rotating files in production.

pub mod tracing;

pub use crate::tracing::*;
