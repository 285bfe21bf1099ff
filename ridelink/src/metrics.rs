use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const QUEUE_DEPTH: &str = "ridelink_queue_depth";
pub const RETRY_ATTEMPTS_TOTAL: &str = "ridelink_retry_attempts_total";
pub const RECONNECTS_TOTAL: &str = "ridelink_reconnects_total";
pub const ACTIONS_DELIVERED_TOTAL: &str = "ridelink_actions_delivered_total";
pub const ACTIONS_FAILED_TOTAL: &str = "ridelink_actions_failed_total";
pub const DELIVERY_DURATION_SECONDS: &str = "ridelink_delivery_duration_seconds";

/// Register metrics emitted by ridelink. This should be called before starting a
/// session. It is safe to call this method multiple times. It is guaranteed to
/// register the metrics only once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_gauge!(
            QUEUE_DEPTH,
            Unit::Count,
            "Number of pending actions in the durable queue"
        );

        describe_counter!(
            RETRY_ATTEMPTS_TOTAL,
            Unit::Count,
            "Total number of retry attempts performed across all operations"
        );

        describe_counter!(
            RECONNECTS_TOTAL,
            Unit::Count,
            "Total number of reconnection cycles started by the connection manager"
        );

        describe_counter!(
            ACTIONS_DELIVERED_TOTAL,
            Unit::Count,
            "Total number of actions acknowledged by the server"
        );

        describe_counter!(
            ACTIONS_FAILED_TOTAL,
            Unit::Count,
            "Total number of actions dropped after a terminal failure"
        );

        describe_histogram!(
            DELIVERY_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to deliver a single action to the server"
        );
    });
}
