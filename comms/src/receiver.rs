//! The receiving end of the framed envelope channel.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::msg::Envelope;
use crate::{LenType, LEN_TYPE_SIZE, MAX_FRAME_SIZE};

/// Reads length-prefixed frames from an async reader and decodes them into
/// envelopes. The frame buffer is reused across receives.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Errors
    /// `InvalidData` for oversized frames or undecodable payloads, plus any
    /// transport error from the underlying reader. A clean peer close while
    /// waiting for a header surfaces as `UnexpectedEof`.
    pub async fn recv(&mut self) -> io::Result<Envelope> {
        let Self { rx, buf } = self;

        let mut header = [0u8; LEN_TYPE_SIZE];
        rx.read_exact(&mut header).await?;
        let len = LenType::from_le_bytes(header) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds cap"),
            ));
        }

        if buf.len() < len {
            buf.resize(len, 0);
        }
        let frame = &mut buf[..len];
        rx.read_exact(frame).await?;

        Envelope::decode(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
