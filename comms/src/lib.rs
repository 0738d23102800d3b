//! Wire protocol between training workers and the parameter master.
//!
//! Every frame is a little-endian u32 length prefix followed by one
//! serialized [`msg::Envelope`]. The protocol is request/response: each
//! request receives exactly one response, and connections are short-lived
//! (one conversation per operation).

pub mod msg;
mod receiver;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use receiver::FrameReceiver;
pub use sender::FrameSender;

type LenType = u32;
const LEN_TYPE_SIZE: usize = std::mem::size_of::<LenType>();

/// Upper bound on a single frame; streamed payloads are chunked below it.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Chunk size used when streaming large buffers across frames.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Creates both ends of a framed envelope channel over a byte stream.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
