//! The sending end of the framed envelope channel.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::msg::Envelope;
use crate::{LenType, MAX_FRAME_SIZE};

/// Serializes envelopes into length-prefixed frames over an async writer.
/// The encode buffer is reused across sends.
pub struct FrameSender<W: AsyncWrite + Unpin> {
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends one envelope as a single frame.
    ///
    /// # Errors
    /// `InvalidInput` when the serialized envelope exceeds the frame cap,
    /// or any transport error from the underlying writer.
    pub async fn send(&mut self, envelope: &Envelope) -> io::Result<()> {
        let Self { tx, buf } = self;

        buf.clear();
        envelope.encode(buf);
        if buf.len() > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds cap", buf.len()),
            ));
        }

        let header = (buf.len() as LenType).to_le_bytes();
        tx.write_all(&header).await?;
        tx.write_all(buf).await?;
        tx.flush().await
    }
}
