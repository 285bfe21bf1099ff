use tokio::sync::watch;

/// Sending side of the shutdown channel.
///
/// Cloneable handle used to notify every subscriber that graceful shutdown is
/// needed. Built on a watch channel of `()` since only the notification
/// matters, not a payload.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals shutdown to all current subscribers.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Returns a new receiver subscribed to this shutdown channel.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiving side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new pair of [`ShutdownTx`] and [`ShutdownRx`].
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
