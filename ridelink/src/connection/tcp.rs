use std::time::Duration;

use ridelink_config::shared::ConnectionConfig;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::codec::{FrameDecoder, write_frame};
use crate::connection::frame::Frame;
use crate::connection::transport::{Transport, TransportConnection};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;

/// [`Transport`] over a plain TCP socket speaking length-prefixed JSON frames.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    auth_token: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            auth_token: config.auth_token.expose_secret().to_string(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

impl Transport for TcpTransport {
    type Conn = TcpConnection;

    fn name() -> &'static str {
        "tcp"
    }

    async fn connect(&self) -> SyncResult<TcpConnection> {
        let address = format!("{}:{}", self.host, self.port);
        debug!(address, "opening tcp connection");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                sync_error!(
                    ErrorKind::Network,
                    "Connect timed out",
                    format!(
                        "no connection to {address} within {}ms",
                        self.connect_timeout.as_millis()
                    )
                )
            })??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let connection = TcpConnection {
            reader: Mutex::new((read_half, FrameDecoder::new())),
            writer: Mutex::new(write_half),
        };

        // Identify ourselves before any other traffic. A rejected token shows
        // up as a server-initiated close or an unauthorized ack.
        connection
            .send(Frame::Hello {
                token: self.auth_token.clone(),
            })
            .await?;

        Ok(connection)
    }
}

/// A live TCP link. The read and write halves are guarded by separate locks so
/// receiving and sending can proceed concurrently from `&self`.
pub struct TcpConnection {
    reader: Mutex<(OwnedReadHalf, FrameDecoder)>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TransportConnection for TcpConnection {
    async fn send(&self, frame: Frame) -> SyncResult<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame).await
    }

    async fn recv(&self) -> SyncResult<Option<Frame>> {
        let mut guard = self.reader.lock().await;
        let (reader, decoder) = &mut *guard;
        decoder.read_frame(reader).await
    }

    async fn close(&self) -> SyncResult<()> {
        use tokio::io::AsyncWriteExt;

        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::connection::codec::FrameDecoder;

    async fn transport_for(listener: &TcpListener) -> TcpTransport {
        let port = listener.local_addr().unwrap().port();
        TcpTransport::new(&ConnectionConfig::localhost(port))
    }

    #[tokio::test]
    async fn test_connect_sends_hello_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = transport_for(&listener).await;

        let (_connection, (mut server, _)) =
            tokio::join!(async { transport.connect().await.unwrap() }, async {
                listener.accept().await.unwrap()
            });

        let mut decoder = FrameDecoder::new();
        let frame = decoder.read_frame(&mut server).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Hello { .. }));
    }

    #[tokio::test]
    async fn test_send_and_recv_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = transport_for(&listener).await;

        let (connection, (mut server, _)) =
            tokio::join!(async { transport.connect().await.unwrap() }, async {
                listener.accept().await.unwrap()
            });

        // Swallow the hello.
        let mut decoder = FrameDecoder::new();
        decoder.read_frame(&mut server).await.unwrap().unwrap();

        connection.send(Frame::Heartbeat { seq: 1 }).await.unwrap();
        let received = decoder.read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(received, Frame::Heartbeat { seq: 1 });

        write_frame(&mut server, &Frame::HeartbeatAck { seq: 1 })
            .await
            .unwrap();
        let acked = connection.recv().await.unwrap().unwrap();
        assert_eq!(acked, Frame::HeartbeatAck { seq: 1 });
    }

    #[tokio::test]
    async fn test_close_shuts_down_write_half() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = transport_for(&listener).await;

        let (connection, (mut server, _)) =
            tokio::join!(async { transport.connect().await.unwrap() }, async {
                listener.accept().await.unwrap()
            });

        connection.close().await.unwrap();

        // Drain the hello, then observe eof from the client.
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert!(!buf.is_empty());
    }
}
