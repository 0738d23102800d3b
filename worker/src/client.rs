//! Client side of the master conversations.
//!
//! Each operation opens its own short-lived connection, exchanges one
//! chunked conversation and closes.

use std::io;

use comms::msg::{status, Envelope, Request, Response};
use comms::{FrameReceiver, FrameSender, CHUNK_SIZE};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Result of pushing a delta to the master.
#[derive(Debug)]
pub enum PushOutcome {
    /// Applied; the master's new version token.
    Applied(String),
    /// The master moved on; the caller must re-sync and drop its delta.
    VersionMismatch,
}

pub struct MasterClient {
    addr: String,
}

impl MasterClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn connect(
        &self,
    ) -> io::Result<(FrameReceiver<OwnedReadHalf>, FrameSender<OwnedWriteHalf>)> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (rx, tx) = stream.into_split();
        Ok(comms::channel(rx, tx))
    }

    /// Fetches the full weight buffer, stitching chunks by position. A
    /// version change between chunks means the master swapped weights
    /// mid-pull; the stitch restarts so the buffer is never torn.
    pub async fn pull_weights(&self) -> io::Result<(String, Vec<u8>)> {
        let (mut rx, mut tx) = self.connect().await?;

        let mut weights = Vec::new();
        let mut pulled: Option<String> = None;
        loop {
            let request = Request::GetWeights {
                version: pulled.clone(),
                position: weights.len() as u64,
            };
            tx.send(&Envelope::Request(request)).await?;

            match rx.recv().await? {
                Envelope::Response(Response::GetWeights {
                    version,
                    buffer,
                    complete,
                }) => {
                    if pulled.as_deref().is_some_and(|v| v != version) {
                        weights.clear();
                        pulled = Some(version);
                        continue;
                    }
                    pulled = Some(version);
                    weights.extend_from_slice(&buffer);
                    if complete {
                        // pulled is always set once a chunk has arrived.
                        return Ok((pulled.unwrap_or_default(), weights));
                    }
                }
                other => return Err(unexpected(other)),
            }
        }
    }

    /// Streams a delta under `version`; `VersionMismatch` is a normal
    /// outcome, every other error response is an `io::Error`.
    pub async fn push_update(&self, version: &str, delta: &[u8]) -> io::Result<PushOutcome> {
        let (mut rx, mut tx) = self.connect().await?;

        for (chunk, complete) in chunked(delta) {
            let request = Request::UpdWeights {
                version: Some(version.to_string()),
                buffer: chunk.to_vec(),
                complete,
            };
            tx.send(&Envelope::Request(request)).await?;

            match rx.recv().await? {
                Envelope::Response(Response::Success) if !complete => {}
                Envelope::Response(Response::UpdWeights { version }) if complete => {
                    return Ok(PushOutcome::Applied(version));
                }
                Envelope::Response(Response::Error {
                    status: status::VERSION_MISMATCH,
                    ..
                }) => {
                    return Ok(PushOutcome::VersionMismatch);
                }
                other => return Err(unexpected(other)),
            }
        }
        unreachable!("chunked always yields a complete chunk")
    }

    /// Streams a full replacement weight set; used to seed a fresh master.
    pub async fn push_weights(&self, version: Option<&str>, weights: &[u8]) -> io::Result<String> {
        let (mut rx, mut tx) = self.connect().await?;

        for (chunk, complete) in chunked(weights) {
            let request = Request::SetWeights {
                version: version.map(str::to_string),
                buffer: chunk.to_vec(),
                complete,
            };
            tx.send(&Envelope::Request(request)).await?;

            match rx.recv().await? {
                Envelope::Response(Response::Success) if !complete => {}
                Envelope::Response(Response::SetWeights { version }) if complete => {
                    return Ok(version);
                }
                other => return Err(unexpected(other)),
            }
        }
        unreachable!("chunked always yields a complete chunk")
    }
}

/// Splits a buffer into protocol chunks; empty buffers still produce one
/// (empty, complete) chunk.
fn chunked(buffer: &[u8]) -> impl Iterator<Item = (&[u8], bool)> {
    let chunks = buffer.len().div_ceil(CHUNK_SIZE).max(1);
    buffer
        .chunks(CHUNK_SIZE)
        .chain(std::iter::once(&buffer[0..0]).take(usize::from(buffer.is_empty())))
        .enumerate()
        .map(move |(i, chunk)| (chunk, i + 1 == chunks))
}

fn unexpected(envelope: Envelope) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected reply: {envelope:?}"),
    )
}
