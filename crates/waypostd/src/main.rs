//! waypostd — waypost store-and-forward node daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use waypost_core::config::WaypostConfig;
use waypost_services::registry::{ADMIN_POLICY, LISTEN_POLICY, POLL_POLICY};
use waypost_services::{Delivery, MemoryStore, Node, NodeKeys, NodeStore, Registry};

mod discovery;
mod identity;
mod tcp;

use tcp::{TcpTransport, TCP_SCHEME};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = WaypostConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = WaypostConfig::load().context("failed to load config")?;
    tracing::info!(path = %WaypostConfig::file_path().display(), "waypostd starting");

    // Keys
    let family = config.identity.key_family;
    let content = identity::load_or_generate(&config.identity.content_key_path, family, "content")?;
    let routing = identity::load_or_generate(&config.identity.routing_key_path, family, "routing")?;
    let keys = NodeKeys::new(content, routing);

    // Registry
    let mut registry = Registry::with_defaults();
    registry.register_transport(TCP_SCHEME, |net| {
        Arc::new(TcpTransport::new(
            net.byte_limit,
            Duration::from_secs(net.rpc_timeout_secs),
        ))
    });
    registry.register_policy(discovery::P2P_POLICY, discovery::policy());

    let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
    let (node, deliveries) = Node::new(config.clone(), store.clone(), keys, Arc::new(registry))
        .context("failed to build node")?;

    let mut policies = vec![LISTEN_POLICY, ADMIN_POLICY, POLL_POLICY];
    let has_peers = !store.list_peers().context("failed to list peers")?.is_empty();
    if config.discovery.enabled && !has_peers {
        policies.push(discovery::P2P_POLICY);
    }
    node.start(&policies).context("failed to start policies")?;
    tracing::info!(?policies, "node running");

    // ── Local tasks ──────────────────────────────────────────────────────────

    let mut printer = tokio::spawn(print_deliveries(deliveries));

    let mut stats_printer = {
        let core = node.core().clone();
        let mut shutdown = node.shutdown_signal();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = interval.tick() => {
                        core.sink().log_stats();
                        core.sync().log_peer_stats();
                        tracing::info!(
                            pending_streams = core.chunker().pending_streams(),
                            outbox = core.store().outbox_len().unwrap_or(0),
                            "node stats"
                        );
                    }
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c()  => tracing::info!("shutdown signal received"),
        r = &mut printer             => tracing::error!("delivery printer exited: {:?}", r),
        r = &mut stats_printer       => tracing::error!("stats printer exited: {:?}", r),
    }

    node.stop().await;
    Ok(())
}

/// One JSON line per consumed message on stdout.
async fn print_deliveries(mut rx: mpsc::Receiver<Delivery>) {
    while let Some(d) = rx.recv().await {
        let line = serde_json::json!({
            "class": format!("{:?}", d.class).to_lowercase(),
            "channel": d.channel,
            "content": String::from_utf8_lossy(&d.content),
            "content_hex": hex::encode(&d.content),
        });
        println!("{line}");
    }
}
