//! TCP transport: call-codec frames over one persistent connection per host.
//!
//! Every request and response is a varint length prefix followed by the
//! encoded record. The client keeps a connection per host and reuses it
//! across calls, reconnecting once if a cached connection turns out to be
//! dead. Reads and writes on the client side carry the configured deadline.
//! On the server side a frame must arrive whole within the deadline once its
//! first byte is in, and a connection idle between frames is closed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;

use waypost_core::codec::{decode_frame, encode_frame, Call, CodecError, Response, Value, MAX_VARINT_LEN};
use waypost_services::transport::{check_frame, RpcHandler, Transport, TransportError};

pub const TCP_SCHEME: &str = "tcp";

/// How long a server connection may sit between frames.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

type Slot = Arc<Mutex<Option<TcpStream>>>;

pub struct TcpTransport {
    byte_limit: usize,
    deadline: Duration,
    idle: Duration,
    conns: DashMap<String, Slot>,
}

impl TcpTransport {
    pub fn new(byte_limit: usize, deadline: Duration) -> Self {
        Self {
            byte_limit,
            deadline,
            idle: IDLE_TIMEOUT,
            conns: DashMap::new(),
        }
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    async fn connect(&self, host: &str) -> Result<TcpStream, TransportError> {
        let stream = timeout(self.deadline, TcpStream::connect(host))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| {
                tracing::debug!(peer = host, error = %e, "connect failed");
                TransportError::Unreachable(host.to_owned())
            })?;
        stream.set_nodelay(true)?;
        tracing::debug!(peer = host, "connected");
        Ok(stream)
    }

    async fn exchange(&self, stream: &mut TcpStream, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        timeout(self.deadline, stream.write_all(frame))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let mut buf = BytesMut::new();
        timeout(self.deadline, read_frame(stream, &mut buf, self.byte_limit))
            .await
            .map_err(|_| TransportError::Timeout)??
            .ok_or(TransportError::Closed)
    }

    /// Bind a listening socket. Split from `serve` so callers can bind port 0
    /// and learn the address.
    pub async fn bind(addr: &str) -> Result<TcpListener, TransportError> {
        TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::AddrInUse(addr.to_owned())
            } else {
                TransportError::Io(e)
            }
        })
    }

    /// Accept connections until shutdown, one task per connection.
    pub async fn serve(
        &self,
        listener: TcpListener,
        handler: Arc<dyn RpcHandler>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TransportError> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "tcp listener bound");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(addr = %local, "tcp listener shutting down");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let handler = handler.clone();
                    let limit = self.byte_limit;
                    let timing = Timing {
                        deadline: self.deadline,
                        idle: self.idle,
                    };
                    let shutdown = shutdown.resubscribe();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, handler, limit, timing, shutdown).await {
                            tracing::debug!(peer = %peer, error = %e, "connection closed");
                        }
                    });
                }
            }
        }
    }
}

/// Read one frame. `None` means the peer closed cleanly between frames.
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    limit: usize,
) -> Result<Option<Vec<u8>>, TransportError> {
    loop {
        match decode_frame(&buf[..]) {
            Ok((record, used)) => {
                check_frame(&buf[..used], limit)?;
                let record = record.to_vec();
                buf.advance(used);
                return Ok(Some(record));
            }
            Err(CodecError::NeedMore) => {}
            Err(e) => return Err(e.into()),
        }
        if buf.len() > limit + MAX_VARINT_LEN {
            return Err(TransportError::FrameTooLarge {
                size: buf.len(),
                limit,
            });
        }
        if reader.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(TransportError::Closed)
            };
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    record: &[u8],
    limit: usize,
) -> Result<(), TransportError> {
    let frame = encode_frame(record)?;
    check_frame(&frame, limit)?;
    writer.write_all(&frame).await?;
    Ok(())
}

#[derive(Clone, Copy)]
struct Timing {
    deadline: Duration,
    idle: Duration,
}

/// Server-side read of the next request. Waits up to `idle` for the first
/// byte, then up to `deadline` for the rest of the frame. `None` means the
/// peer closed or went idle between frames.
async fn next_request(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    limit: usize,
    timing: Timing,
) -> Result<Option<Vec<u8>>, TransportError> {
    if buf.is_empty() {
        match timeout(timing.idle, stream.read_buf(buf)).await {
            Err(_) => {
                tracing::debug!(idle = ?timing.idle, "idle connection closed");
                return Ok(None);
            }
            Ok(read) => {
                if read? == 0 {
                    return Ok(None);
                }
            }
        }
    }
    timeout(timing.deadline, read_frame(stream, buf, limit))
        .await
        .map_err(|_| TransportError::Timeout)?
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn RpcHandler>,
    limit: usize,
    timing: Timing,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), TransportError> {
    let deadline = timing.deadline;
    let mut buf = BytesMut::new();
    loop {
        let record = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            r = next_request(&mut stream, &mut buf, limit, timing) => match r? {
                Some(record) => record,
                None => return Ok(()),
            },
        };

        let response = match Call::decode(&record) {
            Ok(call) => handler.handle(call).await,
            Err(e) => {
                // The stream may be out of sync; answer and hang up.
                let response = Response::err(&e);
                timeout(deadline, write_frame(&mut stream, &response.encode(), limit))
                    .await
                    .map_err(|_| TransportError::Timeout)??;
                return Err(e.into());
            }
        };

        let encoded = response.encode();
        let reply = match encode_frame(&encoded) {
            Ok(frame) if frame.len() <= limit => encoded,
            _ => Response::err(format!("response of {} bytes exceeds the frame limit", encoded.len())).encode(),
        };
        timeout(deadline, write_frame(&mut stream, &reply, limit))
            .await
            .map_err(|_| TransportError::Timeout)??;
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn scheme(&self) -> &str {
        TCP_SCHEME
    }

    fn byte_limit(&self) -> usize {
        self.byte_limit
    }

    async fn rpc(&self, host: &str, call: Call) -> Result<Value, TransportError> {
        let frame = encode_frame(&call.encode())?;
        check_frame(&frame, self.byte_limit)?;

        let slot = self.conns.entry(host.to_owned()).or_default().clone();
        let mut conn = slot.lock().await;

        for attempt in 0..2 {
            let reused = conn.is_some();
            let mut stream = match conn.take() {
                Some(stream) => stream,
                None => self.connect(host).await?,
            };
            match self.exchange(&mut stream, &frame).await {
                Ok(record) => {
                    *conn = Some(stream);
                    return Response::decode(&record)?
                        .into_result()
                        .map_err(TransportError::Remote);
                }
                Err(TransportError::Io(_) | TransportError::Closed) if reused && attempt == 0 => {
                    tracing::debug!(peer = host, "cached connection dead, reconnecting");
                }
                Err(e) => return Err(e),
            }
        }
        Err(TransportError::Closed)
    }

    async fn listen(
        &self,
        addr: &str,
        handler: Arc<dyn RpcHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TransportError> {
        let listener = Self::bind(addr).await?;
        self.serve(listener, handler, shutdown).await
    }
}
