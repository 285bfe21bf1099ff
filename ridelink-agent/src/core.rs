use ridelink::connection::tcp::TcpTransport;
use ridelink::queue::store::sqlite::SqliteActionStore;
use ridelink::session::SyncSession;
use ridelink_config::load_config;
use ridelink_config::shared::{AppConfig, ConnectionConfig, QueueConfig, RetryConfig};
use tracing::{info, warn};

/// Builds and runs one sync session until it terminates.
pub async fn start_agent() -> anyhow::Result<()> {
    info!("starting ridelink agent");

    let config: AppConfig = load_config()?;
    log_config(&config);

    let store = SqliteActionStore::open(&config.queue.storage_path).await?;
    let transport = TcpTransport::new(&config.connection);

    let mut session = SyncSession::new(config, store, transport);
    session.start().await?;

    let mut notices = session
        .notices()
        .expect("notices are available right after start");
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            warn!(
                id = notice.action.id,
                action_type = %notice.action.action_type,
                error = %notice.error,
                "action failed permanently and was dropped from the queue"
            );
        }
    });

    let shutdown_tx = session.shutdown_tx();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.shutdown();
        }
    });

    session.wait().await?;

    info!("ridelink agent completed");

    Ok(())
}

fn log_config(config: &AppConfig) {
    log_connection_config(&config.connection);
    log_queue_config(&config.queue);
    log_retry_config("submit retry config", &config.submit_retry);
    log_retry_config("drain retry config", &config.drain_retry);
}

fn log_connection_config(config: &ConnectionConfig) {
    info!(
        host = config.host,
        port = config.port,
        connect_timeout_ms = config.connect_timeout_ms,
        heartbeat_interval_ms = config.heartbeat_interval_ms,
        heartbeat_timeout_ms = config.heartbeat_timeout_ms,
        ack_timeout_ms = config.ack_timeout_ms,
        reconnect_initial_delay_ms = config.reconnect.initial_delay_ms,
        reconnect_max_delay_ms = config.reconnect.max_delay_ms,
        reconnect_backoff_factor = config.reconnect.backoff_factor,
        "connection config"
    );
}

fn log_queue_config(config: &QueueConfig) {
    info!(storage_path = config.storage_path, "queue config");
}

fn log_retry_config(name: &'static str, config: &RetryConfig) {
    info!(
        max_attempts = config.max_attempts,
        initial_delay_ms = config.initial_delay_ms,
        max_delay_ms = config.max_delay_ms,
        backoff_factor = config.backoff_factor,
        jitter = config.jitter,
        name
    );
}
