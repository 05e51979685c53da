//! Peer synchronizer: pickup/dropoff bundle exchange and one poll round.
//!
//! A bundle is a batch of outbox envelopes sealed once to the receiving
//! node's routing key, plus the timestamp of the newest entry it carries.
//! Per-peer watermarks only move forward, so a round never re-sends what the
//! peer already took and never skips what it has not.

use std::sync::Arc;

use dashmap::DashMap;

use waypost_core::codec::{varint_len, Action, Call, CodecError, Value, MAX_VARINT_LEN};
use waypost_core::crypto::{seal_overhead, CryptoError};
use waypost_core::{Bundle, PublicKey};

use crate::keys::NodeKeys;
use crate::router::{RouteOutcome, Router};
use crate::store::{NodeStore, StoreError};
use crate::transport::{Transport, TransportError};

/// Call framing around a bundle inside one transport frame.
const BUNDLE_FRAME_OVERHEAD: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("bundle is empty")]
    EmptyBundle,
    #[error("bundle is not addressed to this node's routing key")]
    NotAddressed,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What this process knows about one remote host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub routing_key: Option<PublicKey>,
    /// Newest local outbox entry the peer has received.
    pub last_local: i64,
    /// Newest remote outbox entry this node has received.
    pub last_remote: i64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Result of one poll round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub sent_bytes: usize,
    pub received_bytes: usize,
    /// Envelopes from the remote bundle that were routed.
    pub routed: usize,
}

/// Largest plaintext batch whose sealed bundle still fits a call frame on a
/// transport with this byte limit.
pub fn bundle_budget(byte_limit: usize) -> usize {
    byte_limit.saturating_sub(seal_overhead(byte_limit) + BUNDLE_FRAME_OVERHEAD)
}

pub struct Synchronizer {
    store: Arc<dyn NodeStore>,
    keys: Arc<NodeKeys>,
    router: Arc<Router>,
    channel_filter: Vec<String>,
    peers: DashMap<String, PeerInfo>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn NodeStore>,
        keys: Arc<NodeKeys>,
        router: Arc<Router>,
        channel_filter: Vec<String>,
    ) -> Self {
        Self {
            store,
            keys,
            router,
            channel_filter,
            peers: DashMap::new(),
        }
    }

    /// Outbox entries newer than `since`, oldest first, sealed to `caller`.
    ///
    /// Entries are taken in order until the next one would push the batch
    /// past `max_bytes`. An entry that could never fit on its own is skipped.
    /// With nothing to send the bundle is empty and its time is `since`.
    pub fn pickup(
        &self,
        caller: &PublicKey,
        since: i64,
        max_bytes: usize,
        channels: &[String],
    ) -> Result<Bundle, SyncError> {
        let budget = max_bytes.saturating_sub(1 + MAX_VARINT_LEN);
        let mut used = 0usize;
        let mut batch = Vec::new();
        let mut newest = since;

        for msg in self.store.outbox_since(since, channels)? {
            let cost = varint_len(msg.data.len() as u64) + msg.data.len();
            if cost > budget {
                tracing::warn!(
                    bytes = msg.data.len(),
                    budget,
                    channel = %msg.channel,
                    "outbox entry larger than any bundle, skipped"
                );
                continue;
            }
            if used + cost > budget {
                break;
            }
            used += cost;
            newest = newest.max(msg.time);
            batch.push(msg.data);
        }

        if batch.is_empty() {
            return Ok(Bundle::empty(since));
        }

        let count = batch.len();
        let data = caller.seal(&Value::BytesArray(batch).encode())?;
        tracing::debug!(
            to = %caller.short_id(),
            entries = count,
            bytes = data.len(),
            "pickup"
        );
        Ok(Bundle { data, time: newest })
    }

    /// Open a bundle with the routing key and route every envelope in it.
    /// Returns how many envelopes were routed; a failing element is logged
    /// and skipped.
    pub fn dropoff(&self, bundle: &Bundle) -> Result<usize, SyncError> {
        if bundle.is_empty() {
            return Err(SyncError::EmptyBundle);
        }
        let plaintext = self
            .keys
            .routing()
            .open(&bundle.data)?
            .ok_or(SyncError::NotAddressed)?;
        let envelopes = Value::decode(&plaintext)?.into_bytes_array()?;

        let total = envelopes.len();
        let mut routed = 0;
        let mut duplicates = 0;
        for (index, envelope) in envelopes.iter().enumerate() {
            match self.router.route(envelope) {
                Ok(RouteOutcome::Duplicate) => duplicates += 1,
                Ok(RouteOutcome::Routed { .. }) => routed += 1,
                Err(e) => {
                    tracing::warn!(index, error = %e, "bundle element dropped");
                }
            }
        }
        tracing::debug!(total, routed, duplicates, "dropoff");
        Ok(routed)
    }

    pub fn peer_info(&self, host: &str) -> Option<PeerInfo> {
        self.peers.get(host).map(|p| p.clone())
    }

    pub fn peers(&self) -> Vec<(String, PeerInfo)> {
        let mut out: Vec<_> = self
            .peers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn log_peer_stats(&self) {
        for (host, info) in self.peers() {
            tracing::info!(
                peer = %host,
                tx_bytes = info.tx_bytes,
                rx_bytes = info.rx_bytes,
                last_local = info.last_local,
                last_remote = info.last_remote,
                "peer stats"
            );
        }
    }

    /// The remote's routing key: the given one, the cached one, or asked for
    /// once over the transport.
    async fn remote_key(
        &self,
        transport: &dyn Transport,
        host: &str,
        given: Option<PublicKey>,
    ) -> Result<PublicKey, SyncError> {
        if let Some(key) = given {
            self.peers.entry(host.to_owned()).or_default().routing_key = Some(key);
            return Ok(key);
        }
        if let Some(key) = self.peers.get(host).and_then(|p| p.routing_key) {
            return Ok(key);
        }
        let key = transport
            .rpc(host, Call::new(Action::Id, vec![]))
            .await?
            .into_public_key()?;
        tracing::info!(peer = host, key = %key.short_id(), "learned peer routing key");
        self.peers.entry(host.to_owned()).or_default().routing_key = Some(key);
        Ok(key)
    }

    /// One bidirectional round with `host`.
    pub async fn poll_server(
        &self,
        transport: &dyn Transport,
        host: &str,
        remote_key: Option<PublicKey>,
    ) -> Result<PollReport, SyncError> {
        let key = self.remote_key(transport, host, remote_key).await?;
        let (last_local, last_remote) = {
            let info = self.peers.entry(host.to_owned()).or_default();
            (info.last_local, info.last_remote)
        };
        let budget = bundle_budget(transport.byte_limit());

        let outgoing = self.pickup(&key, last_local, budget, &[])?;

        let mut args = vec![
            Value::PublicKey(self.keys.routing_public()),
            Value::Int(last_remote),
            Value::Uint(budget as u64),
        ];
        args.extend(self.channel_filter.iter().cloned().map(Value::Str));
        let incoming = transport
            .rpc(host, Call::new(Action::Pickup, args))
            .await?
            .into_bundle()?;

        let mut report = PollReport::default();

        if !outgoing.is_empty() {
            let sent = outgoing.data.len();
            let time = outgoing.time;
            transport
                .rpc(host, Call::new(Action::Dropoff, vec![Value::Bundle(outgoing)]))
                .await?;
            let mut info = self.peers.entry(host.to_owned()).or_default();
            info.last_local = info.last_local.max(time);
            info.tx_bytes += sent as u64;
            report.sent_bytes = sent;
        }

        if !incoming.is_empty() {
            let received = incoming.data.len();
            report.routed = self.dropoff(&incoming)?;
            let mut info = self.peers.entry(host.to_owned()).or_default();
            info.last_remote = info.last_remote.max(incoming.time);
            info.rx_bytes += received as u64;
            report.received_bytes = received;
        }

        tracing::debug!(
            peer = host,
            sent = report.sent_bytes,
            received = report.received_bytes,
            routed = report.routed,
            "poll round"
        );
        Ok(report)
    }
}
