//! Node store: channels, contacts, profiles, peers and the outbox.
//!
//! The routing core only sees the `NodeStore` trait. `MemoryStore` is the
//! in-process implementation; it guards each collection separately so no
//! single lock serializes routing.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use dashmap::DashMap;
use waypost_core::{Channel, Contact, OutboxMsg, Peer, Profile};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store backend: {0}")]
    Backend(String),
}

/// CRUD for the node's records plus an append-only, time-ordered outbox.
/// Implementations provide their own concurrency safety.
pub trait NodeStore: Send + Sync {
    fn get_channel(&self, name: &str) -> Result<Option<Channel>, StoreError>;
    fn list_channels(&self) -> Result<Vec<Channel>, StoreError>;
    fn put_channel(&self, channel: Channel) -> Result<(), StoreError>;
    fn delete_channel(&self, name: &str) -> Result<bool, StoreError>;

    fn get_contact(&self, name: &str) -> Result<Option<Contact>, StoreError>;
    fn list_contacts(&self) -> Result<Vec<Contact>, StoreError>;
    fn put_contact(&self, contact: Contact) -> Result<(), StoreError>;
    fn delete_contact(&self, name: &str) -> Result<bool, StoreError>;

    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError>;
    fn list_profiles(&self) -> Result<Vec<Profile>, StoreError>;
    fn put_profile(&self, profile: Profile) -> Result<(), StoreError>;
    fn delete_profile(&self, name: &str) -> Result<bool, StoreError>;

    fn get_peer(&self, name: &str) -> Result<Option<Peer>, StoreError>;
    fn list_peers(&self) -> Result<Vec<Peer>, StoreError>;
    fn put_peer(&self, peer: Peer) -> Result<(), StoreError>;
    fn delete_peer(&self, name: &str) -> Result<bool, StoreError>;

    fn append_outbox(&self, msg: OutboxMsg) -> Result<(), StoreError>;
    /// Entries with `time > since`, ascending. An empty filter matches every
    /// channel label, private traffic included.
    fn outbox_since(&self, since: i64, channels: &[String]) -> Result<Vec<OutboxMsg>, StoreError>;
    /// Drop entries with `time < cutoff`. Returns how many were removed.
    fn delete_outbox_before(&self, cutoff: i64) -> Result<usize, StoreError>;
    fn outbox_len(&self) -> Result<usize, StoreError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    channels: DashMap<String, Channel>,
    contacts: DashMap<String, Contact>,
    profiles: DashMap<String, Profile>,
    peers: DashMap<String, Peer>,
    /// (time, insertion seq) -> entry. The seq keeps equal timestamps from
    /// different writers apart.
    outbox: RwLock<BTreeMap<(i64, u64), OutboxMsg>>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted<T: Clone>(map: &DashMap<String, T>) -> Vec<T> {
    let mut entries: Vec<(String, T)> = map
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().map(|(_, v)| v).collect()
}

impl NodeStore for MemoryStore {
    fn get_channel(&self, name: &str) -> Result<Option<Channel>, StoreError> {
        Ok(self.channels.get(name).map(|c| c.clone()))
    }

    fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        Ok(sorted(&self.channels))
    }

    fn put_channel(&self, channel: Channel) -> Result<(), StoreError> {
        self.channels.insert(channel.name.clone(), channel);
        Ok(())
    }

    fn delete_channel(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.channels.remove(name).is_some())
    }

    fn get_contact(&self, name: &str) -> Result<Option<Contact>, StoreError> {
        Ok(self.contacts.get(name).map(|c| c.clone()))
    }

    fn list_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        Ok(sorted(&self.contacts))
    }

    fn put_contact(&self, contact: Contact) -> Result<(), StoreError> {
        self.contacts.insert(contact.name.clone(), contact);
        Ok(())
    }

    fn delete_contact(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.contacts.remove(name).is_some())
    }

    fn get_profile(&self, name: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.get(name).map(|p| p.clone()))
    }

    fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        Ok(sorted(&self.profiles))
    }

    fn put_profile(&self, profile: Profile) -> Result<(), StoreError> {
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    fn delete_profile(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.profiles.remove(name).is_some())
    }

    fn get_peer(&self, name: &str) -> Result<Option<Peer>, StoreError> {
        Ok(self.peers.get(name).map(|p| p.clone()))
    }

    fn list_peers(&self) -> Result<Vec<Peer>, StoreError> {
        Ok(sorted(&self.peers))
    }

    fn put_peer(&self, peer: Peer) -> Result<(), StoreError> {
        self.peers.insert(peer.name.clone(), peer);
        Ok(())
    }

    fn delete_peer(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.peers.remove(name).is_some())
    }

    fn append_outbox(&self, msg: OutboxMsg) -> Result<(), StoreError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut outbox = self.outbox.write().map_err(|_| StoreError::Poisoned)?;
        outbox.insert((msg.time, seq), msg);
        Ok(())
    }

    fn outbox_since(&self, since: i64, channels: &[String]) -> Result<Vec<OutboxMsg>, StoreError> {
        let outbox = self.outbox.read().map_err(|_| StoreError::Poisoned)?;
        Ok(outbox
            .range((Bound::Excluded((since, u64::MAX)), Bound::Unbounded))
            .map(|(_, m)| m)
            .filter(|m| channels.is_empty() || channels.iter().any(|c| *c == m.channel))
            .cloned()
            .collect())
    }

    fn delete_outbox_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        let mut outbox = self.outbox.write().map_err(|_| StoreError::Poisoned)?;
        let keep = outbox.split_off(&(cutoff, 0));
        let removed = outbox.len();
        *outbox = keep;
        Ok(removed)
    }

    fn outbox_len(&self) -> Result<usize, StoreError> {
        Ok(self.outbox.read().map_err(|_| StoreError::Poisoned)?.len())
    }
}
