//! The node's two identities.
//!
//! The content key addresses messages and can be swapped at runtime by
//! loading a profile. The routing key identifies the node to its peers for
//! pickup and dropoff and never changes while the node runs.

use std::sync::RwLock;

use waypost_core::{Keypair, PublicKey};

pub struct NodeKeys {
    content: RwLock<Keypair>,
    routing: Keypair,
}

impl NodeKeys {
    pub fn new(content: Keypair, routing: Keypair) -> Self {
        Self {
            content: RwLock::new(content),
            routing,
        }
    }

    pub fn content(&self) -> Keypair {
        match self.content.read() {
            Ok(kp) => kp.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn content_public(&self) -> PublicKey {
        self.content().public()
    }

    /// Replace the content key. Returns the previous one.
    pub fn swap_content(&self, next: Keypair) -> Keypair {
        let mut slot = match self.content.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *slot, next)
    }

    pub fn routing(&self) -> &Keypair {
        &self.routing
    }

    pub fn routing_public(&self) -> PublicKey {
        self.routing.public()
    }
}
