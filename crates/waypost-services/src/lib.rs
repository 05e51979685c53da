//! waypost services: routing, chunking, peer sync and the node that runs them.

pub mod chunker;
pub mod delivery;
pub mod discovery;
pub mod keys;
pub mod node;
pub mod policy;
pub mod recent;
pub mod registry;
pub mod router;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod transport;

pub use delivery::Delivery;
pub use keys::NodeKeys;
pub use node::{Node, NodeCore, NodeError};
pub use registry::{Registry, Shutdown};
pub use store::{MemoryStore, NodeStore};
