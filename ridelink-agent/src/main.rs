use std::time::{Duration, Instant};

use ridelink_telemetry::tracing::init_tracing;
use tracing::{error, warn};

mod core;

use crate::core::start_agent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_name = env!("CARGO_BIN_NAME");
    let _log_flusher = init_tracing(app_name)?;

    const INITIAL_BACKOFF: u64 = 5; // 5 seconds
    const MAX_BACKOFF: u64 = 300; // 5 minutes
    const RESET_THRESHOLD: u64 = 600; // 10 minutes

    let mut backoff_secs = INITIAL_BACKOFF;

    loop {
        let started = Instant::now();
        let result = start_agent().await;
        let ran_for = started.elapsed();

        match result {
            Ok(()) => break Ok(()),

            Err(err) if is_transient(&err) => {
                // A healthy run long enough means the previous trouble is
                // over; start the backoff ladder from the bottom again.
                if ran_for >= Duration::from_secs(RESET_THRESHOLD) {
                    backoff_secs = INITIAL_BACKOFF;
                }

                warn!("session ended with a transient error, restarting in {}s: {:#}", backoff_secs, err);
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF);
                continue;
            }

            Err(err) => {
                error!("session ended with a non-transient error: {:#}", err);
                break Err(err);
            }
        }
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ridelink::error::SyncError>()
        .is_some_and(|err| err.kind().is_retryable())
}
