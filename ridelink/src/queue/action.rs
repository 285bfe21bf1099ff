use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SyncError};
use crate::sync_error;

/// Closed set of state-changing user actions the queue carries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RateRide,
    SendMessage,
    CancelRide,
    UpdateProfile,
}

impl ActionType {
    /// Derives the stable idempotency key for an action of this type with the
    /// given locally generated id. The key is what the server deduplicates on,
    /// so it must never change once an action has been sent.
    pub fn derive_key(&self, id: i64) -> String {
        format!("{self}-{id}")
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateRide => write!(f, "rate_ride"),
            Self::SendMessage => write!(f, "send_message"),
            Self::CancelRide => write!(f, "cancel_ride"),
            Self::UpdateProfile => write!(f, "update_profile"),
        }
    }
}

impl FromStr for ActionType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rate_ride" => Ok(Self::RateRide),
            "send_message" => Ok(Self::SendMessage),
            "cancel_ride" => Ok(Self::CancelRide),
            "update_profile" => Ok(Self::UpdateProfile),
            other => Err(sync_error!(
                ErrorKind::DeserializationError,
                "Unknown action type",
                format!("action type '{other}' is not part of the closed set")
            )),
        }
    }
}

/// A mutation handed to the queue, before a durable id has been assigned.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub action_type: ActionType,
    /// Opaque serialized payload; the queue never inspects it.
    pub payload: String,
    /// Precomputed idempotency key. Set when a direct delivery attempt
    /// already sent this key to the server, so the queued replay is a
    /// server-side duplicate of the same logical action. [`None`] lets the
    /// store derive the key from the assigned id.
    pub idempotency_key: Option<String>,
}

impl NewAction {
    pub fn new(action_type: ActionType, payload: impl Into<String>) -> Self {
        Self {
            action_type,
            payload: payload.into(),
            idempotency_key: None,
        }
    }
}

/// A durably persisted pending action.
///
/// Immutable once stored except for `attempt_count`, which only ever
/// increments.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAction {
    /// Locally generated, unique, monotonically increasing within a store.
    pub id: i64,
    pub action_type: ActionType,
    pub payload: String,
    /// Enqueue time, unix epoch milliseconds. Primary drain ordering key.
    pub enqueued_at: i64,
    /// Completed delivery rounds that exhausted their retry budget.
    pub attempt_count: u32,
    pub idempotency_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_key_is_stable() {
        assert_eq!(ActionType::RateRide.derive_key(42), "rate_ride-42");
        assert_eq!(ActionType::SendMessage.derive_key(7), "send_message-7");
    }

    #[test]
    fn test_action_type_display_from_str_roundtrip() {
        for action_type in [
            ActionType::RateRide,
            ActionType::SendMessage,
            ActionType::CancelRide,
            ActionType::UpdateProfile,
        ] {
            let parsed: ActionType = action_type.to_string().parse().unwrap();
            assert_eq!(parsed, action_type);
        }

        assert!("delete_account".parse::<ActionType>().is_err());
    }
}
