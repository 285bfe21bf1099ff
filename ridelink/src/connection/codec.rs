use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bail;
use crate::connection::frame::Frame;
use crate::error::{ErrorKind, SyncError, SyncResult};

/// Maximum serialized frame body size. Anything larger is treated as a
/// protocol violation rather than buffered.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const LEN_PREFIX_LEN: usize = 4;

/// Serializes a frame into its wire form: a `u32` big-endian body length
/// followed by the JSON body.
pub fn encode_frame(frame: &Frame) -> SyncResult<Bytes> {
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        bail!(
            ErrorKind::SerializationError,
            "Frame too large",
            format!(
                "serialized frame is {} bytes, maximum is {MAX_FRAME_LEN}",
                body.len()
            )
        );
    }

    let mut encoded = BytesMut::with_capacity(LEN_PREFIX_LEN + body.len());
    encoded.put_u32(body.len() as u32);
    encoded.put_slice(&body);

    Ok(encoded.freeze())
}

/// Writes one frame to the given writer and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> SyncResult<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_frame(frame)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;

    Ok(())
}

/// Incremental decoder for length-prefixed frames.
///
/// The decoder keeps its read buffer across calls, so [`FrameDecoder::read_frame`]
/// is cancel safe: a future dropped mid-read leaves any bytes already consumed
/// from the socket in the buffer, and the next call resumes from them.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Reads bytes from `reader` until a full frame is buffered, then decodes
    /// it. Returns [`None`] on a clean end of stream at a frame boundary.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> SyncResult<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.try_decode()? {
                return Ok(Some(frame));
            }

            let read = reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }

                bail!(
                    ErrorKind::ConnectionClosed,
                    "Connection closed mid-frame",
                    format!("stream ended with {} unconsumed bytes", self.buf.len())
                );
            }
        }
    }

    /// Attempts to decode one frame from the buffered bytes, returning
    /// [`None`] if the buffer does not yet hold a complete frame.
    fn try_decode(&mut self) -> SyncResult<Option<Frame>> {
        if self.buf.len() < LEN_PREFIX_LEN {
            return Ok(None);
        }

        let body_len = BigEndian::read_u32(&self.buf[..LEN_PREFIX_LEN]) as usize;
        if body_len > MAX_FRAME_LEN {
            bail!(
                ErrorKind::DeserializationError,
                "Frame too large",
                format!("peer announced a {body_len} byte frame, maximum is {MAX_FRAME_LEN}")
            );
        }

        if self.buf.len() < LEN_PREFIX_LEN + body_len {
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX_LEN);
        let body = self.buf.split_to(body_len);
        let frame = serde_json::from_slice(&body)?;

        Ok(Some(frame))
    }
}
