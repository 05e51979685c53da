//! Constructor registry for transports and policies.
//!
//! Built once at process start and handed to `Node::new`. The services crate
//! registers what it can build without a network stack (`poll`, `listen`,
//! `admin`); the daemon adds its socket transports and discovery policy.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use waypost_core::config::NetworkConfig;
use waypost_core::records::DEFAULT_SCHEME;

use crate::chunker::{self, ChunkError};
use crate::node::{NodeCore, NodeError};
use crate::policy::PollPolicy;
use crate::rpc;
use crate::transport::Transport;

/// Receiving end of a node's stop signal.
pub type Shutdown = broadcast::Receiver<()>;

/// A long-lived policy loop, ready to spawn.
pub type PolicyFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub type TransportCtor = Box<dyn Fn(&NetworkConfig) -> Arc<dyn Transport> + Send + Sync>;

pub type PolicyCtor =
    Box<dyn Fn(Arc<NodeCore>, Shutdown) -> Result<PolicyFuture, NodeError> + Send + Sync>;

/// Built-in policy names.
pub const POLL_POLICY: &str = "poll";
pub const LISTEN_POLICY: &str = "listen";
pub const ADMIN_POLICY: &str = "admin";

#[derive(Default)]
pub struct Registry {
    transports: BTreeMap<String, TransportCtor>,
    policies: BTreeMap<String, PolicyCtor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in policies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_policy(POLL_POLICY, |core, shutdown| {
            let policy = Arc::new(PollPolicy::from_core(&core));
            Ok(Box::pin(policy.run(shutdown)))
        });
        registry.register_policy(LISTEN_POLICY, listen_policy(false));
        registry.register_policy(ADMIN_POLICY, listen_policy(true));
        registry
    }

    pub fn register_transport<F>(&mut self, scheme: &str, ctor: F)
    where
        F: Fn(&NetworkConfig) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        if self.transports.insert(scheme.to_owned(), Box::new(ctor)).is_some() {
            tracing::warn!(scheme, "transport constructor replaced");
        }
    }

    pub fn register_policy<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(Arc<NodeCore>, Shutdown) -> Result<PolicyFuture, NodeError> + Send + Sync + 'static,
    {
        if self.policies.insert(name.to_owned(), Box::new(ctor)).is_some() {
            tracing::warn!(policy = name, "policy constructor replaced");
        }
    }

    pub fn policy(&self, name: &str) -> Option<&PolicyCtor> {
        self.policies.get(name)
    }

    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.keys().map(String::as_str).collect()
    }

    /// One instance of every registered transport.
    pub fn build_transports(&self, config: &NetworkConfig) -> TransportSet {
        let mut set = TransportSet::default();
        for (scheme, ctor) in &self.transports {
            set.by_scheme.insert(scheme.clone(), ctor(config));
        }
        set
    }
}

fn listen_policy(admin: bool) -> PolicyCtor {
    Box::new(move |core: Arc<NodeCore>, shutdown: Shutdown| -> Result<PolicyFuture, NodeError> {
        let network = &core.config().network;
        let addr = if admin {
            network.admin_addr.clone()
        } else {
            network.public_addr.clone()
        };
        let transport = core.transports().primary().ok_or(NodeError::NoTransports)?;
        Ok(rpc::serve(core, transport, addr, admin, shutdown))
    })
}

/// The transports a node was built with, keyed by URI scheme.
#[derive(Clone, Default)]
pub struct TransportSet {
    by_scheme: BTreeMap<String, Arc<dyn Transport>>,
}

impl TransportSet {
    pub fn insert(&mut self, scheme: &str, transport: Arc<dyn Transport>) {
        self.by_scheme.insert(scheme.to_owned(), transport);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Transport>> {
        self.by_scheme.get(scheme).cloned()
    }

    /// The transport listeners bind with: the default scheme if present,
    /// otherwise the first registered.
    pub fn primary(&self) -> Option<Arc<dyn Transport>> {
        self.get(DEFAULT_SCHEME)
            .or_else(|| self.by_scheme.values().next().cloned())
    }

    pub fn len(&self) -> usize {
        self.by_scheme.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_scheme.is_empty()
    }

    pub fn schemes(&self) -> Vec<&str> {
        self.by_scheme.keys().map(String::as_str).collect()
    }

    /// Largest plaintext one envelope may carry on every transport.
    /// Smallest frame every attached transport carries.
    pub fn byte_limit(&self) -> Option<usize> {
        self.by_scheme.values().map(|t| t.byte_limit()).min()
    }

    pub fn chunk_size(&self) -> Result<usize, ChunkError> {
        chunker::chunk_size(self.by_scheme.values().map(|t| t.byte_limit()))
    }
}

/// Seconds from config as a duration, never zero.
pub(crate) fn secs(n: u64) -> Duration {
    Duration::from_secs(n.max(1))
}
