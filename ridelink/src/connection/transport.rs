use std::future::Future;

use crate::connection::frame::Frame;
use crate::error::SyncResult;

/// A factory for persistent bidirectional links to the server.
///
/// The connection manager calls [`Transport::connect`] for every attempt of a
/// reconnect cycle; each call must produce a fresh, fully handshaken link.
pub trait Transport: Send + Sync + 'static {
    type Conn: TransportConnection;

    /// Short transport name used in logs.
    fn name() -> &'static str;

    /// Opens a new link and performs the client handshake.
    fn connect(&self) -> impl Future<Output = SyncResult<Self::Conn>> + Send;
}

/// One live link produced by a [`Transport`].
///
/// Methods take `&self` so a single connection can be driven from a read loop
/// and a write path concurrently; implementations serialize access to each
/// half internally.
pub trait TransportConnection: Send + Sync + 'static {
    /// Sends one frame.
    fn send(&self, frame: Frame) -> impl Future<Output = SyncResult<()>> + Send;

    /// Receives the next inbound frame, or [`None`] on a clean peer close.
    ///
    /// Must be cancel safe: dropping the returned future must not lose a
    /// partially received frame.
    fn recv(&self) -> impl Future<Output = SyncResult<Option<Frame>>> + Send;

    /// Closes the link. Further sends and receives fail.
    fn close(&self) -> impl Future<Output = SyncResult<()>> + Send;
}
