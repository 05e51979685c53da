//! Records kept by a node and exchanged over RPC.

use crate::crypto::{KeyFamily, Keypair, PublicKey};

/// Scheme assumed for peer URIs written without one.
pub const DEFAULT_SCHEME: &str = "tcp";

/// A named public key used for one-to-one sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub public_key: PublicKey,
}

/// A group mailbox. Every member holds the same keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub keypair: Keypair,
}

impl Channel {
    pub fn generate(name: impl Into<String>, family: KeyFamily) -> Self {
        Self {
            name: name.into(),
            keypair: Keypair::generate(family),
        }
    }

    /// Join a channel by name and shared passphrase.
    pub fn from_passphrase(name: impl Into<String>, passphrase: &str, family: KeyFamily) -> Self {
        let name = name.into();
        let keypair = Keypair::from_passphrase(family, &name, passphrase);
        Self { name, keypair }
    }
}

/// An alternate content identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    /// Tried on receipt when profile checking is on.
    pub enabled: bool,
    pub keypair: Keypair,
}

/// A sync target for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub enabled: bool,
    /// `scheme://address`, e.g. `tcp://10.0.0.7:7450`.
    pub uri: String,
    pub group: String,
}

impl Peer {
    /// Transport scheme of the URI.
    pub fn scheme(&self) -> &str {
        split_uri(&self.uri).0
    }

    /// Transport-level host address of the URI.
    pub fn address(&self) -> &str {
        split_uri(&self.uri).1
    }
}

/// Split `scheme://address`. A bare address gets the default scheme.
pub fn split_uri(uri: &str) -> (&str, &str) {
    uri.split_once("://").unwrap_or((DEFAULT_SCHEME, uri))
}

/// A sealed batch of envelopes plus the watermark of its newest entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub data: Vec<u8>,
    pub time: i64,
}

impl Bundle {
    pub fn empty(time: i64) -> Self {
        Self {
            data: Vec::new(),
            time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One outbox entry: a complete envelope waiting to be picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMsg {
    /// Channel label; empty for private traffic.
    pub channel: String,
    pub data: Vec<u8>,
    /// Nanoseconds, strictly increasing per node.
    pub time: i64,
}
