//! Discovery listener.
//!
//! Joins the multicast group and feeds every advertisement to the
//! negotiator. When it elects to initiate, a poll loop for that peer is
//! spawned; the loops are joined when discovery stops.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;

use waypost_core::records::split_uri;
use waypost_services::discovery::{Advertisement, Decision, Negotiator};
use waypost_services::policy::PeerLoop;
use waypost_services::registry::Shutdown;
use waypost_services::NodeCore;

const MAX_DATAGRAM: usize = 1500;

pub async fn listen_loop(
    negotiator: Arc<Negotiator>,
    group: SocketAddrV4,
    core: Arc<NodeCore>,
    mut shutdown: Shutdown,
) -> Result<()> {
    let socket = UdpSocket::from_std(make_listener_socket(group).context("failed to create multicast listener")?)
        .context("failed to convert to tokio UdpSocket")?;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut peers = JoinSet::new();
    let interval = std::time::Duration::from_secs(core.config().discovery.peer_poll_interval_secs.max(1));

    tracing::info!(group = %group, "discovery listener starting");

    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.recv() => break,
            r = socket.recv_from(&mut buf) => match r {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "recv_from failed");
                    continue;
                }
            },
        };

        let ad = match Advertisement::decode(&buf[..len]) {
            Ok(ad) => ad,
            Err(e) => {
                tracing::trace!(from = %from, error = %e, "ignoring datagram");
                continue;
            }
        };

        if negotiator.observe(&ad) != Decision::Initiate {
            continue;
        }
        let (scheme, host) = split_uri(&ad.addr);
        let Some(transport) = core.transports().get(scheme) else {
            tracing::warn!(peer = %ad.node, scheme, "no transport for advertised scheme");
            continue;
        };
        let peer = PeerLoop::new(core.sync().clone(), transport, host, interval);
        peers.spawn(peer.run(shutdown.resubscribe()));
    }

    tracing::info!(peers = peers.len(), "discovery listener shutting down");
    while let Some(r) = peers.join_next().await {
        if let Err(e) = r {
            tracing::error!("peer loop exited: {:?}", e);
        }
    }
    Ok(())
}

fn make_listener_socket(group: SocketAddrV4) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()).into())
        .context("bind()")?;
    socket
        .join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)
        .context("IP_ADD_MEMBERSHIP")?;
    Ok(socket.into())
}
