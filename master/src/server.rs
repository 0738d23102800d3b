//! Accept loop and per-connection request handling.

use std::io;
use std::sync::Arc;

use comms::msg::{status, Envelope, Request, Response};
use comms::{FrameReceiver, FrameSender, CHUNK_SIZE};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::store::{StoreError, WeightStore};

/// Serves the store on `listener` until the task is cancelled. Each
/// connection runs on its own task; a failed conversation only drops that
/// connection.
pub async fn serve(listener: TcpListener, store: Arc<WeightStore>) -> io::Result<()> {
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("worker connected from {peer}");

        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            if let Err(e) = handle_connection(rx, tx, store).await {
                // Partial streams are discarded with the connection.
                debug!("connection from {peer} closed: {e}");
            }
        });

        // Reap finished handlers without blocking the accept loop.
        while tasks.try_join_next().is_some() {}
    }
}

/// One request/response conversation. Streamed SetWeights/UpdWeights
/// chunks accumulate locally and touch the store only when complete.
pub async fn handle_connection<R, W>(
    mut rx: FrameReceiver<R>,
    mut tx: FrameSender<W>,
    store: Arc<WeightStore>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stream_buf: Vec<u8> = Vec::new();

    loop {
        let envelope = match rx.recv().await {
            Ok(envelope) => envelope,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        let request = match envelope {
            Envelope::Request(request) => request,
            Envelope::Response(resp) => {
                warn!("received a response on the server side: {resp:?}");
                let reply = Response::Error {
                    status: status::INTERNAL,
                    message: "expected a request".into(),
                };
                tx.send(&Envelope::Response(reply)).await?;
                return Err(io::Error::other("unexpected response envelope"));
            }
        };

        let reply = match request {
            Request::GetWeights { position, .. } => {
                let (version, buffer, complete) = store.chunk(position, CHUNK_SIZE);
                Response::GetWeights {
                    version,
                    buffer,
                    complete,
                }
            }
            Request::SetWeights {
                version,
                buffer,
                complete,
            } => {
                stream_buf.extend_from_slice(&buffer);
                if !complete {
                    Response::Success
                } else {
                    let weights = std::mem::take(&mut stream_buf);
                    info!("replacing weights ({} bytes)", weights.len());
                    match store.replace(version.as_deref(), weights) {
                        Ok(version) => Response::SetWeights { version },
                        Err(e) => error_response(e),
                    }
                }
            }
            Request::UpdWeights {
                version,
                buffer,
                complete,
            } => {
                stream_buf.extend_from_slice(&buffer);
                if !complete {
                    Response::Success
                } else {
                    let delta = std::mem::take(&mut stream_buf);
                    debug!("applying update ({} bytes)", delta.len());
                    match store.apply_update(version.as_deref(), &delta) {
                        Ok(version) => Response::UpdWeights { version },
                        Err(e) => error_response(e),
                    }
                }
            }
        };

        tx.send(&Envelope::Response(reply)).await?;
    }
}

fn error_response(e: StoreError) -> Response {
    let status = match e {
        StoreError::VersionMismatch { .. } => status::VERSION_MISMATCH,
        StoreError::Codec(_) => status::CODEC,
        StoreError::Incompatible { .. } => status::INTERNAL,
    };
    warn!("rejected write: {e}");
    Response::Error {
        status,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comms::msg::Request;
    use tokio::io as tokio_io;

    async fn client_pair(
        store: Arc<WeightStore>,
    ) -> (
        FrameReceiver<tokio_io::ReadHalf<tokio_io::DuplexStream>>,
        FrameSender<tokio_io::WriteHalf<tokio_io::DuplexStream>>,
    ) {
        let (server_stream, client_stream) = tokio_io::duplex(1024 * 1024);
        let (s_rx, s_tx) = tokio_io::split(server_stream);
        let (s_rx, s_tx) = comms::channel(s_rx, s_tx);
        tokio::spawn(handle_connection(s_rx, s_tx, store));

        let (c_rx, c_tx) = tokio_io::split(client_stream);
        comms::channel(c_rx, c_tx)
    }

    #[tokio::test]
    async fn test_get_weights_chunks_round_trip() {
        let store = Arc::new(WeightStore::new((0u8..200).collect()));
        let (mut rx, mut tx) = client_pair(Arc::clone(&store)).await;

        let mut assembled = Vec::new();
        let mut position = 0u64;
        loop {
            tx.send(&Envelope::Request(Request::GetWeights {
                version: None,
                position,
            }))
            .await
            .unwrap();

            match rx.recv().await.unwrap() {
                Envelope::Response(Response::GetWeights {
                    buffer, complete, ..
                }) => {
                    position += buffer.len() as u64;
                    assembled.extend_from_slice(&buffer);
                    if complete {
                        break;
                    }
                }
                other => panic!("unexpected reply: {other:?}"),
            }
        }

        assert_eq!(assembled, store.snapshot());
    }

    #[tokio::test]
    async fn test_chunked_set_weights_replaces_buffer() {
        let store = Arc::new(WeightStore::new(Vec::new()));
        let (mut rx, mut tx) = client_pair(Arc::clone(&store)).await;

        tx.send(&Envelope::Request(Request::SetWeights {
            version: None,
            buffer: vec![1, 2, 3],
            complete: false,
        }))
        .await
        .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            Envelope::Response(Response::Success)
        ));

        tx.send(&Envelope::Request(Request::SetWeights {
            version: None,
            buffer: vec![4, 5],
            complete: true,
        }))
        .await
        .unwrap();
        match rx.recv().await.unwrap() {
            Envelope::Response(Response::SetWeights { version }) => {
                assert_eq!(store.version(), version);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        assert_eq!(store.snapshot(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_stale_update_gets_version_mismatch() {
        let mut weights = Vec::new();
        let t = graph::tensor::full(1, 1, 1.0);
        graph::storage::write_weights(&[&t], &mut weights).unwrap();
        let store = Arc::new(WeightStore::new(weights.clone()));

        let (mut rx, mut tx) = client_pair(Arc::clone(&store)).await;

        tx.send(&Envelope::Request(Request::UpdWeights {
            version: Some("not-the-version".into()),
            buffer: weights,
            complete: true,
        }))
        .await
        .unwrap();

        match rx.recv().await.unwrap() {
            Envelope::Response(Response::Error { status: s, .. }) => {
                assert_eq!(s, status::VERSION_MISMATCH);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
