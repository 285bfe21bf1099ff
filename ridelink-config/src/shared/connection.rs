use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::BackoffConfig;

/// Configuration for the persistent bidirectional connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Hostname of the realtime endpoint.
    pub host: String,
    /// Port of the realtime endpoint.
    pub port: u16,
    /// Opaque session token sent in the hello frame after connecting.
    pub auth_token: SerializableSecretString,
    /// Maximum time to wait for the transport to establish a connection.
    pub connect_timeout_ms: u64,
    /// Interval between heartbeat probes on an established connection.
    pub heartbeat_interval_ms: u64,
    /// Maximum time without a heartbeat acknowledgement before the connection
    /// is treated as dead.
    pub heartbeat_timeout_ms: u64,
    /// Maximum time to wait for the server to acknowledge a delivered action.
    pub ack_timeout_ms: u64,
    /// Reconnect backoff applied while the connection is wanted.
    #[serde(default)]
    pub reconnect: BackoffConfig,
}

impl ConnectionConfig {
    /// Returns a configuration suitable for local development against
    /// `localhost`.
    pub fn localhost(port: u16) -> Self {
        Self {
            host: "localhost".to_owned(),
            port,
            auth_token: String::new().into(),
            connect_timeout_ms: 5_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            ack_timeout_ms: 10_000,
            reconnect: BackoffConfig::default(),
        }
    }
}
