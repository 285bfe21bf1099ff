use serde::{Deserialize, Serialize};

/// Configuration for the durable offline action queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Filesystem path of the sqlite database backing the queue.
    pub storage_path: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_path: "ridelink-queue.db".to_owned(),
        }
    }
}
