//! Peer discovery negotiation.
//!
//! Nodes without a configured peer list announce `(node, addr, rank)` on a
//! multicast group, with a fresh random rank in every announcement. The
//! first time a node hears from another it decides once whether to start
//! polling it: it initiates when its own current rank is less than or equal
//! to the announced one. Equal ranks make both sides initiate.
//!
//! The socket side lives in the daemon; this module only holds the election.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("malformed advertisement: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One multicast announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Announcing node, by routing key id.
    pub node: String,
    /// URI other nodes should poll, e.g. `tcp://10.0.0.7:7450`.
    pub addr: String,
    pub rank: u64,
}

impl Advertisement {
    pub fn encode(&self) -> Result<Vec<u8>, DiscoveryError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Whether a node with `own` rank should start polling a peer announcing
/// `peer`.
pub fn should_initiate(own: u64, peer: u64) -> bool {
    own <= peer
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// First sighting and we hold the lower or equal rank.
    Initiate,
    /// First sighting; the peer is expected to initiate.
    Wait,
    /// Our own announcement, or a node already decided on.
    Ignore,
}

pub struct Negotiator {
    node: String,
    rank: AtomicU64,
    /// Nodes already decided on, with the decision.
    seen: DashMap<String, Decision>,
}

impl Negotiator {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            rank: AtomicU64::new(rand::random()),
            seen: DashMap::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn rank(&self) -> u64 {
        self.rank.load(Ordering::Relaxed)
    }

    /// Next announcement, with a freshly rolled rank.
    pub fn advertise(&self, addr: &str) -> Advertisement {
        let rank = rand::random();
        self.rank.store(rank, Ordering::Relaxed);
        Advertisement {
            node: self.node.clone(),
            addr: addr.to_owned(),
            rank,
        }
    }

    /// Decide what to do about an announcement heard on the wire.
    pub fn observe(&self, ad: &Advertisement) -> Decision {
        if ad.node == self.node {
            return Decision::Ignore;
        }
        let own = self.rank();
        match self.seen.entry(ad.node.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Decision::Ignore,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let decision = if should_initiate(own, ad.rank) {
                    Decision::Initiate
                } else {
                    Decision::Wait
                };
                slot.insert(decision);
                tracing::info!(
                    peer = %ad.node,
                    addr = %ad.addr,
                    own_rank = own,
                    peer_rank = ad.rank,
                    ?decision,
                    "discovered peer"
                );
                decision
            }
        }
    }

    pub fn known_peers(&self) -> usize {
        self.seen.len()
    }

    #[cfg(test)]
    fn set_rank(&self, rank: u64) {
        self.rank.store(rank, Ordering::Relaxed);
    }
}
