//! Transport contract and the in-process transport.
//!
//! A transport moves call-codec frames between hosts. It advertises the
//! largest frame it carries, performs one request/response per `rpc`, and
//! serves a handler on an address until shutdown. Which surface a listener
//! exposes (public or admin) is decided by the handler it is given.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use waypost_core::codec::{decode_frame, encode_frame, Call, CodecError, Response, Value};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("host {0} unreachable")]
    Unreachable(String),
    #[error("address {0} already in use")]
    AddrInUse(String),
    #[error("rpc timed out")]
    Timeout,
    #[error("frame of {size} bytes exceeds the {limit}-byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("connection closed")]
    Closed,
    #[error("remote error: {0}")]
    Remote(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serves decoded calls.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, call: Call) -> Response;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// URI scheme this transport serves, e.g. `tcp`.
    fn scheme(&self) -> &str;

    /// Largest frame this transport carries.
    fn byte_limit(&self) -> usize;

    /// One call to `host`. Remote handler errors come back as `Remote`.
    async fn rpc(&self, host: &str, call: Call) -> Result<Value, TransportError>;

    /// Serve `handler` on `addr` until `shutdown` fires.
    async fn listen(
        &self,
        addr: &str,
        handler: Arc<dyn RpcHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TransportError>;
}

/// Check a frame against a transport's limit.
pub fn check_frame(frame: &[u8], limit: usize) -> Result<(), TransportError> {
    if frame.len() > limit {
        return Err(TransportError::FrameTooLarge {
            size: frame.len(),
            limit,
        });
    }
    Ok(())
}

// ── In-process transport ──────────────────────────────────────────────────────

/// Host table shared by every `MemoryTransport` attached to it. Each host
/// keeps the frame limit of the transport that bound it.
#[derive(Clone, Default)]
pub struct MemoryHub {
    hosts: Arc<DashMap<String, (Arc<dyn RpcHandler>, usize)>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self, addr: &str) -> bool {
        self.hosts.contains_key(addr)
    }
}

/// Transport over a `MemoryHub`. Every call and response is framed, size
/// checked and decoded exactly as a byte-stream transport would. Both ends'
/// limits apply: an oversize request fails like a dropped connection and an
/// oversize reply comes back as a remote error, as the TCP server sends it.
pub struct MemoryTransport {
    hub: MemoryHub,
    byte_limit: usize,
}

pub const MEMORY_SCHEME: &str = "mem";

impl MemoryTransport {
    pub fn new(hub: MemoryHub, byte_limit: usize) -> Self {
        Self { hub, byte_limit }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn scheme(&self) -> &str {
        MEMORY_SCHEME
    }

    fn byte_limit(&self) -> usize {
        self.byte_limit
    }

    async fn rpc(&self, host: &str, call: Call) -> Result<Value, TransportError> {
        let (handler, served_limit) = self
            .hub
            .hosts
            .get(host)
            .map(|h| h.value().clone())
            .ok_or_else(|| TransportError::Unreachable(host.to_owned()))?;

        let frame = encode_frame(&call.encode())?;
        check_frame(&frame, self.byte_limit)?;
        check_frame(&frame, served_limit)?;
        let (record, _) = decode_frame(&frame)?;
        let mut response = handler.handle(Call::decode(record)?).await;

        let encoded = response.encode();
        if encode_frame(&encoded)?.len() > served_limit {
            response = Response::err(format!(
                "response of {} bytes exceeds the frame limit",
                encoded.len()
            ));
        }
        let frame = encode_frame(&response.encode())?;
        check_frame(&frame, self.byte_limit)?;
        let (record, _) = decode_frame(&frame)?;
        Response::decode(record)?
            .into_result()
            .map_err(TransportError::Remote)
    }

    async fn listen(
        &self,
        addr: &str,
        handler: Arc<dyn RpcHandler>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TransportError> {
        match self.hub.hosts.entry(addr.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::AddrInUse(addr.to_owned()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert((handler, self.byte_limit));
            }
        }
        tracing::info!(addr, "memory listener bound");

        let _ = shutdown.recv().await;
        self.hub.hosts.remove(addr);
        tracing::info!(addr, "memory listener closed");
        Ok(())
    }
}
