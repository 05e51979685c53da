//! Multicast peer discovery.
//!
//! `broadcast` announces this node on the configured IPv4 group; `listener`
//! hears other nodes and starts a poll loop for each one this node is elected
//! to initiate with. Both run under the `p2p` policy.

pub mod broadcast;
pub mod listener;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};

use waypost_core::config::DiscoveryConfig;
use waypost_services::discovery::Negotiator;
use waypost_services::registry::{PolicyCtor, PolicyFuture, Shutdown};
use waypost_services::{NodeCore, NodeError};

use crate::tcp::TCP_SCHEME;

pub const P2P_POLICY: &str = "p2p";

pub fn group_addr(config: &DiscoveryConfig) -> Result<SocketAddrV4> {
    let group: Ipv4Addr = config
        .multicast_group
        .parse()
        .with_context(|| format!("bad multicast group {:?}", config.multicast_group))?;
    if !group.is_multicast() {
        anyhow::bail!("{} is not a multicast address", group);
    }
    Ok(SocketAddrV4::new(group, config.port))
}

/// The URI other nodes should poll: this host's outbound address with the
/// public listener's port.
pub fn reachable_uri(public_addr: &str, group: SocketAddrV4) -> Result<String> {
    let listen: SocketAddr = public_addr
        .parse()
        .with_context(|| format!("bad public address {public_addr:?}"))?;
    let ip = if listen.ip().is_unspecified() {
        let outbound = std::net::UdpSocket::bind("0.0.0.0:0")?;
        outbound.connect(group)?;
        outbound.local_addr()?.ip()
    } else {
        listen.ip()
    };
    Ok(format!("{TCP_SCHEME}://{}", SocketAddr::new(ip, listen.port())))
}

async fn run(core: Arc<NodeCore>, mut shutdown: Shutdown) -> Result<()> {
    let config = core.config().discovery.clone();
    let group = group_addr(&config)?;
    let uri = reachable_uri(&core.config().network.public_addr, group)?;
    let negotiator = Arc::new(Negotiator::new(core.keys().routing_public().short_id()));
    tracing::info!(group = %group, uri, node = negotiator.node(), "discovery starting");

    let advertise = broadcast::advertise_loop(negotiator.clone(), group, uri, &config, shutdown.resubscribe());
    let listen = listener::listen_loop(negotiator, group, core, shutdown.resubscribe());

    tokio::select! {
        _ = shutdown.recv() => Ok(()),
        r = advertise => r.context("discovery broadcast"),
        r = listen => r.context("discovery listener"),
    }
}

/// Constructor for the `p2p` policy.
pub fn policy() -> PolicyCtor {
    Box::new(|core: Arc<NodeCore>, shutdown: Shutdown| -> Result<PolicyFuture, NodeError> {
        Ok(Box::pin(async move {
            if let Err(e) = run(core, shutdown).await {
                tracing::error!(error = %e, "discovery exited");
            }
        }))
    })
}
