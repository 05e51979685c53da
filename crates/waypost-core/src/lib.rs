//! waypost-core: wire layouts, the call codec, and cryptographic primitives.
//! All other waypost crates depend on this one.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod records;
pub mod time;
pub mod wire;

pub use crypto::{KeyFamily, Keypair, PublicKey};
pub use records::{Bundle, Channel, Contact, OutboxMsg, Peer, Profile};
