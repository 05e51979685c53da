//! waypost integration test harness.
//!
//! Every test runs a handful of in-process nodes joined by one
//! `MemoryHub`. Each node serves its public surface under its own host name
//! and reaches the others through the `mem` transport, so a poll round here
//! exercises the same framing, sealing and routing a socket transport would.
//!
//! Polls are driven by hand rather than by the poll policy's timer so the
//! hop order stays deterministic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use waypost_core::config::WaypostConfig;
use waypost_core::{Contact, KeyFamily, Keypair, Peer, PublicKey};
use waypost_services::registry::{ADMIN_POLICY, LISTEN_POLICY};
use waypost_services::sync::PollReport;
use waypost_services::transport::{MemoryHub, MemoryTransport, Transport, MEMORY_SCHEME};
use waypost_services::{Delivery, MemoryStore, Node, NodeCore, NodeKeys, NodeStore, Registry};

mod chunking;
mod discovery;
mod forwarding;
mod messaging;
mod polling;
mod profiles;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Frame limit every test transport enforces.
pub const LIMIT: usize = 4096;

/// How long a test waits for a delivery before giving up.
pub const DELIVERY_WAIT: Duration = Duration::from_secs(2);

pub struct TestNode {
    pub node: Node,
    pub rx: mpsc::Receiver<Delivery>,
    pub store: Arc<MemoryStore>,
    pub host: String,
}

impl TestNode {
    pub fn core(&self) -> &Arc<NodeCore> {
        self.node.core()
    }

    pub fn uri(&self) -> String {
        format!("{MEMORY_SCHEME}://{}", self.host)
    }

    pub fn admin_host(&self) -> String {
        format!("{}-admin", self.host)
    }

    pub fn content_key(&self) -> PublicKey {
        self.core().keys().content_public()
    }

    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.core()
            .transports()
            .get(MEMORY_SCHEME)
            .context("node has no mem transport")
    }

    /// Store `other`'s content key as a contact called `name`.
    pub fn add_contact(&self, name: &str, other: &TestNode) -> Result<()> {
        self.store.put_contact(Contact {
            name: name.to_owned(),
            public_key: other.content_key(),
        })?;
        Ok(())
    }

    pub fn add_peer(&self, name: &str, uri: &str, group: &str) -> Result<()> {
        self.store.put_peer(Peer {
            name: name.to_owned(),
            enabled: true,
            uri: uri.to_owned(),
            group: group.to_owned(),
        })?;
        Ok(())
    }

    /// One poll round from this node against `server`.
    pub async fn poll(&self, server: &TestNode) -> Result<PollReport> {
        let transport = self.transport()?;
        let report = self
            .core()
            .sync()
            .poll_server(transport.as_ref(), &server.host, None)
            .await
            .with_context(|| format!("{} polling {}", self.host, server.host))?;
        Ok(report)
    }

    pub async fn next_delivery(&mut self) -> Result<Delivery> {
        match tokio::time::timeout(DELIVERY_WAIT, self.rx.recv()).await {
            Ok(Some(d)) => Ok(d),
            Ok(None) => bail!("{}: delivery queue closed", self.host),
            Err(_) => bail!("{}: no delivery within {:?}", self.host, DELIVERY_WAIT),
        }
    }

    /// True if nothing is waiting in the delivery queue.
    pub fn idle(&mut self) -> bool {
        self.rx.try_recv().is_err()
    }
}

/// Build a node serving its public surface (and its admin surface, when
/// `admin` is set) on `hub`. `tweak` edits the config before the node is built.
pub async fn spawn_node(
    hub: &MemoryHub,
    host: &str,
    admin: bool,
    tweak: impl FnOnce(&mut WaypostConfig),
) -> Result<TestNode> {
    spawn_node_with_limit(hub, host, admin, LIMIT, tweak).await
}

/// `spawn_node` with a frame limit other than `LIMIT`.
pub async fn spawn_node_with_limit(
    hub: &MemoryHub,
    host: &str,
    admin: bool,
    limit: usize,
    tweak: impl FnOnce(&mut WaypostConfig),
) -> Result<TestNode> {
    let mut config = WaypostConfig::default();
    config.network.public_addr = host.to_owned();
    config.network.admin_addr = format!("{host}-admin");
    tweak(&mut config);

    let shared = hub.clone();
    let mut registry = Registry::with_defaults();
    registry.register_transport(MEMORY_SCHEME, move |_| {
        Arc::new(MemoryTransport::new(shared.clone(), limit))
    });

    let store = Arc::new(MemoryStore::new());
    let keys = NodeKeys::new(
        Keypair::generate(KeyFamily::X25519ChaCha),
        Keypair::generate(KeyFamily::X25519Aes),
    );
    let (node, rx) = Node::new(config, store.clone(), keys, Arc::new(registry))
        .with_context(|| format!("failed to build node {host}"))?;

    let mut policies = vec![LISTEN_POLICY];
    if admin {
        policies.push(ADMIN_POLICY);
    }
    node.start(&policies)?;

    wait_listening(hub, host).await?;
    if admin {
        wait_listening(hub, &format!("{host}-admin")).await?;
    }

    Ok(TestNode {
        node,
        rx,
        store,
        host: host.to_owned(),
    })
}

/// Listeners bind from a spawned task; wait until `host` answers.
pub async fn wait_listening(hub: &MemoryHub, host: &str) -> Result<()> {
    for _ in 0..400 {
        if hub.is_listening(host) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("{host} never started listening")
}

pub async fn stop_all(nodes: &[&TestNode]) {
    for n in nodes {
        n.node.stop().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Listeners come up and go away with the node.
#[tokio::test]
async fn test_node_listens_until_stopped() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "a", true, |_| {}).await?;
    assert!(hub.is_listening("a"));
    assert!(hub.is_listening("a-admin"));

    a.node.stop().await;
    assert!(!hub.is_listening("a"));
    assert!(!hub.is_listening("a-admin"));
    Ok(())
}

/// Two nodes may not claim the same host.
#[tokio::test]
async fn test_second_listener_on_same_host_fails() -> Result<()> {
    let hub = MemoryHub::new();
    let a = spawn_node(&hub, "shared", false, |_| {}).await?;
    // The second node's listener exits with AddrInUse, so "other" never
    // comes up and the first node keeps the host.
    let second = spawn_node(&hub, "other", false, |c| c.network.public_addr = "shared".into()).await;
    assert!(second.is_err());
    assert!(hub.is_listening("shared"));
    a.node.stop().await;
    assert!(!hub.is_listening("shared"));
    Ok(())
}
