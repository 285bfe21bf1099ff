use serde::{Deserialize, Serialize};

use crate::queue::action::ActionType;

/// A single message exchanged over the persistent connection.
///
/// Frames are serialized as JSON objects tagged by `type` and carried inside
/// the length-prefixed envelope implemented by [`crate::connection::codec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame sent by the client after the socket opens. The token is an
    /// opaque credential; the server answers a bad token by closing the link
    /// or by rejecting the first action with an unauthorized ack.
    Hello { token: String },

    /// Periodic liveness probe sent by the client.
    Heartbeat { seq: u64 },

    /// Server reply to a heartbeat, echoing the sequence number.
    HeartbeatAck { seq: u64 },

    /// A state-changing user action. The idempotency key lets the server
    /// recognize a redelivery of the same logical action and treat it as a
    /// no-op.
    Action {
        idempotency_key: String,
        action_type: ActionType,
        payload: String,
    },

    /// Server acknowledgement for an action, matched by idempotency key.
    Ack {
        idempotency_key: String,
        outcome: AckOutcome,
    },

    /// Unsolicited server push (ride status, chat message, driver location).
    Event { event_type: String, payload: String },
}

/// Outcome carried by an [`Frame::Ack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AckOutcome {
    /// The server processed the action (or had already processed a duplicate).
    Accepted,

    /// The server refused the action. The code follows HTTP status semantics
    /// and drives failure classification on the client.
    Rejected { code: u16, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_json_shape_is_tagged_by_type() {
        let frame = Frame::Heartbeat { seq: 7 };
        let json = serde_json::to_string(&frame).unwrap();

        assert_eq!(json, r#"{"type":"heartbeat","seq":7}"#);
    }

    #[test]
    fn test_ack_outcome_roundtrip() {
        let frame = Frame::Ack {
            idempotency_key: "rate_ride-12".to_string(),
            outcome: AckOutcome::Rejected {
                code: 400,
                reason: "invalid rating".to_string(),
            },
        };

        let json = serde_json::to_string(&frame).unwrap();
        let parsed: Frame = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, frame);
    }
}
