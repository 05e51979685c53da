//! Poll policies.
//!
//! `PollPolicy` walks the configured peers one group at a time. Each wake it
//! runs a poll round against every enabled peer of the current group,
//! counting consecutive failures per URI and skipping a URI once it reaches
//! the retry ceiling. A pass that attempts nobody moves on to the next group.
//! After the last group it wraps to the first only with `retry_forever`,
//! which also clears the failure counts.
//!
//! `PeerLoop` polls a single host forever; discovery starts one per peer it
//! elects to initiate with.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::{self, Instant};

use waypost_core::config::SyncConfig;
use waypost_core::time::now_nanos;
use waypost_core::Peer;

use crate::node::NodeCore;
use crate::registry::{secs, Shutdown, TransportSet};
use crate::store::{NodeStore, StoreError};
use crate::sync::Synchronizer;
use crate::transport::Transport;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Outcome of one pass over the current group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub group: Option<String>,
    pub attempted: usize,
    pub succeeded: usize,
    /// Peers past the retry ceiling or with no transport for their scheme.
    pub skipped: usize,
}

pub struct PollPolicy {
    sync: Arc<Synchronizer>,
    store: Arc<dyn NodeStore>,
    transports: TransportSet,
    config: SyncConfig,
    failures: DashMap<String, u32>,
    group: AtomicUsize,
    last_flush: Mutex<Instant>,
}

impl PollPolicy {
    pub fn new(
        sync: Arc<Synchronizer>,
        store: Arc<dyn NodeStore>,
        transports: TransportSet,
        config: SyncConfig,
    ) -> Self {
        Self {
            sync,
            store,
            transports,
            config,
            failures: DashMap::new(),
            group: AtomicUsize::new(0),
            last_flush: Mutex::new(Instant::now()),
        }
    }

    pub fn from_core(core: &NodeCore) -> Self {
        Self::new(
            core.sync().clone(),
            core.store().clone(),
            core.transports().clone(),
            core.config().sync.clone(),
        )
    }

    /// Poll interval shortened by a random share of the jitter fraction.
    pub fn next_delay(&self) -> Duration {
        let discount = self.config.jitter * rand::thread_rng().gen::<f64>();
        secs(self.config.poll_interval_secs).mul_f64((1.0 - discount).max(0.0))
    }

    /// Group order: explicit config, else every group in use, sorted.
    fn groups(&self, peers: &[Peer]) -> Vec<String> {
        if !self.config.groups.is_empty() {
            return self.config.groups.clone();
        }
        let mut groups: Vec<String> = peers.iter().map(|p| p.group.clone()).collect();
        groups.sort();
        groups.dedup();
        groups
    }

    pub fn failures(&self, uri: &str) -> u32 {
        self.failures.get(uri).map_or(0, |n| *n)
    }

    pub fn group_index(&self) -> usize {
        self.group.load(Ordering::Relaxed)
    }

    fn advance_group(&self, count: usize) {
        let current = self.group_index();
        if current + 1 < count {
            self.group.store(current + 1, Ordering::Relaxed);
            tracing::info!(group = current + 1, "no reachable peers, moving to next group");
        } else if self.config.retry_forever {
            self.group.store(0, Ordering::Relaxed);
            self.failures.clear();
            tracing::info!("peer groups exhausted, starting over");
        } else {
            tracing::debug!("peer groups exhausted");
        }
    }

    /// One pass over the current group.
    pub async fn poll_once(&self) -> Result<PassReport, StoreError> {
        let peers: Vec<Peer> = self
            .store
            .list_peers()?
            .into_iter()
            .filter(|p| p.enabled)
            .collect();
        let groups = self.groups(&peers);
        if groups.is_empty() {
            return Ok(PassReport::default());
        }
        let index = self.group_index().min(groups.len() - 1);
        let group = &groups[index];
        let mut report = PassReport {
            group: Some(group.clone()),
            ..PassReport::default()
        };

        for peer in peers.iter().filter(|p| &p.group == group) {
            if self.failures(&peer.uri) >= self.config.retry_ceiling {
                tracing::debug!(peer = %peer.name, uri = %peer.uri, "retry ceiling reached, skipped");
                report.skipped += 1;
                continue;
            }
            let Some(transport) = self.transports.get(peer.scheme()) else {
                tracing::warn!(peer = %peer.name, scheme = peer.scheme(), "no transport for scheme");
                report.skipped += 1;
                continue;
            };

            report.attempted += 1;
            match self.sync.poll_server(transport.as_ref(), peer.address(), None).await {
                Ok(_) => {
                    self.failures.remove(&peer.uri);
                    report.succeeded += 1;
                }
                Err(e) => {
                    let mut count = self.failures.entry(peer.uri.clone()).or_insert(0);
                    *count += 1;
                    tracing::warn!(
                        peer = %peer.name,
                        uri = %peer.uri,
                        failures = *count,
                        error = %e,
                        "poll failed"
                    );
                }
            }
        }

        if report.attempted == 0 {
            self.advance_group(groups.len());
        }
        Ok(report)
    }

    /// Drop outbox entries past the retention age once per flush interval.
    pub fn flush_if_due(&self) -> Result<usize, StoreError> {
        {
            let mut last = self.last_flush.lock().map_err(|_| StoreError::Poisoned)?;
            if last.elapsed() < secs(self.config.flush_interval_secs) {
                return Ok(0);
            }
            *last = Instant::now();
        }
        self.flush()
    }

    pub fn flush(&self) -> Result<usize, StoreError> {
        let retention = i64::try_from(self.config.retention_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(NANOS_PER_SEC);
        let removed = self
            .store
            .delete_outbox_before(now_nanos().saturating_sub(retention))?;
        if removed > 0 {
            tracing::info!(removed, "outbox flushed");
        }
        Ok(removed)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        tracing::info!(
            interval_secs = self.config.poll_interval_secs,
            jitter = self.config.jitter,
            "poll loop starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("poll loop shutting down");
                    return;
                }

                _ = time::sleep(self.next_delay()) => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "poll pass failed");
                    }
                    if let Err(e) = self.flush_if_due() {
                        tracing::warn!(error = %e, "outbox flush failed");
                    }
                    self.sync.log_peer_stats();
                }
            }
        }
    }
}

/// Polls one host on a fixed interval until shutdown.
pub struct PeerLoop {
    sync: Arc<Synchronizer>,
    transport: Arc<dyn Transport>,
    host: String,
    interval: Duration,
}

impl PeerLoop {
    pub fn new(
        sync: Arc<Synchronizer>,
        transport: Arc<dyn Transport>,
        host: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            sync,
            transport,
            host: host.into(),
            interval,
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tracing::info!(peer = %self.host, "peer loop starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(peer = %self.host, "peer loop shutting down");
                    return;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.sync.poll_server(self.transport.as_ref(), &self.host, None).await {
                        tracing::warn!(peer = %self.host, error = %e, "poll failed");
                    }
                }
            }
        }
    }
}
