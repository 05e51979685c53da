//! Discovery announcements.
//!
//! Sends one JSON advertisement per interval to the multicast group, each
//! with a freshly rolled rank.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time;

use waypost_core::config::DiscoveryConfig;
use waypost_services::discovery::Negotiator;
use waypost_services::Shutdown;

pub async fn advertise_loop(
    negotiator: Arc<Negotiator>,
    group: SocketAddrV4,
    uri: String,
    config: &DiscoveryConfig,
    mut shutdown: Shutdown,
) -> Result<()> {
    let socket = UdpSocket::from_std(make_sender_socket().context("failed to create multicast sender")?)
        .context("failed to convert to tokio UdpSocket")?;

    let every = Duration::from_secs(config.advertise_interval_secs.max(1));
    let mut interval = time::interval(every);

    tracing::info!(group = %group, interval_secs = every.as_secs(), "discovery broadcast starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("discovery broadcast shutting down");
                return Ok(());
            }

            _ = interval.tick() => {
                let ad = negotiator.advertise(&uri);
                let bytes = ad.encode()?;
                match socket.send_to(&bytes, group).await {
                    Ok(n) => tracing::trace!(bytes = n, rank = ad.rank, "advertisement sent"),
                    Err(e) => tracing::warn!(error = %e, "advertisement send failed"),
                }
            }
        }
    }
}

fn make_sender_socket() -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    // TTL 1: stay on the local segment.
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
        .context("bind()")?;
    Ok(socket.into())
}
