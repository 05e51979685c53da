//! Node: wires the store, keys, router, chunker and synchronizer together and
//! owns the background tasks.
//!
//! `NodeCore` is the shared state every surface and policy works against.
//! `Node` adds the task set and the stop signal: `start` spawns the
//! reassembly loop and the named policies, `stop` signals them all and joins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use waypost_core::config::WaypostConfig;
use waypost_core::records::split_uri;
use waypost_core::time::now_nanos;
use waypost_core::wire::{self, EnvelopeFlags, WireError};
use waypost_core::{OutboxMsg, PublicKey};

use crate::chunker::{self, ChunkError, Chunker, Piece};
use crate::delivery::{delivery_queue, Delivery, DeliverySink};
use crate::keys::NodeKeys;
use crate::policy::PeerLoop;
use crate::registry::{secs, PolicyFuture, Registry, Shutdown, TransportSet};
use crate::router::Router;
use crate::rpc;
use crate::store::{NodeStore, StoreError};
use crate::sync::Synchronizer;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("no contact named {0:?}")]
    UnknownContact(String),
    #[error("no channel named {0:?}")]
    UnknownChannel(String),
    #[error("no profile named {0:?}")]
    UnknownProfile(String),
    #[error("no policy named {0:?}")]
    UnknownPolicy(String),
    #[error("no transport for scheme {0:?}")]
    UnknownScheme(String),
    #[error("no transports registered")]
    NoTransports,
    #[error("channel name of {len} bytes leaves no room for content (at most {max})")]
    ChannelNameTooLong { len: usize, max: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

pub struct NodeCore {
    config: WaypostConfig,
    store: Arc<dyn NodeStore>,
    keys: Arc<NodeKeys>,
    chunker: Arc<Chunker>,
    router: Arc<Router>,
    sync: Arc<Synchronizer>,
    transports: TransportSet,
    chunk_size: usize,
    sink: DeliverySink,
}

impl NodeCore {
    pub fn config(&self) -> &WaypostConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn keys(&self) -> &Arc<NodeKeys> {
        &self.keys
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn chunker(&self) -> &Arc<Chunker> {
        &self.chunker
    }

    pub fn sync(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    pub fn transports(&self) -> &TransportSet {
        &self.transports
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn sink(&self) -> &DeliverySink {
        &self.sink
    }

    /// Send to a stored contact. Returns how many envelopes were queued.
    pub fn send(&self, contact: &str, content: &[u8]) -> Result<usize, NodeError> {
        let contact = self
            .store
            .get_contact(contact)?
            .ok_or_else(|| NodeError::UnknownContact(contact.to_owned()))?;
        self.send_to(&contact.public_key, content)
    }

    /// Send to a bare public key.
    pub fn send_to(&self, dest: &PublicKey, content: &[u8]) -> Result<usize, NodeError> {
        self.emit(dest, None, content)
    }

    /// Post to a stored channel.
    pub fn send_channel(&self, name: &str, content: &[u8]) -> Result<usize, NodeError> {
        let channel = self
            .store
            .get_channel(name)?
            .ok_or_else(|| NodeError::UnknownChannel(name.to_owned()))?;
        self.emit(&channel.keypair.public(), Some(&channel.name), content)
    }

    /// Envelope `content` (chunked if it does not fit one envelope), remember
    /// every fingerprint so echoes are dropped, and queue it in the outbox.
    fn emit(&self, dest: &PublicKey, channel: Option<&str>, content: &[u8]) -> Result<usize, NodeError> {
        let room = self.content_room(channel)?;
        let pieces = if content.len() <= room {
            vec![Piece {
                flags: EnvelopeFlags::empty(),
                plaintext: content.to_vec(),
            }]
        } else {
            chunker::split(content, room, channel)?
        };

        let label = channel.unwrap_or_default();
        let count = pieces.len();
        for piece in pieces {
            let envelope = wire::seal_envelope(&piece.plaintext, dest, piece.flags, channel)?;
            self.router.remember(&envelope)?;
            self.store.append_outbox(OutboxMsg {
                channel: label.to_owned(),
                data: envelope,
                time: now_nanos(),
            })?;
        }
        tracing::debug!(
            to = %dest.short_id(),
            channel = label,
            bytes = content.len(),
            envelopes = count,
            "queued"
        );
        Ok(count)
    }

    /// Plaintext room per envelope once the clear-text channel header is paid
    /// for. A stream header carries the name again in its plaintext, so the
    /// name may take at most half the chunk size.
    fn content_room(&self, channel: Option<&str>) -> Result<usize, NodeError> {
        let Some(name) = channel else {
            return Ok(self.chunk_size);
        };
        let header = 2 + name.len();
        let max = (self.chunk_size.saturating_sub(wire::CHUNK_HEADER_RESERVE) / 2).saturating_sub(2);
        if name.len() > max {
            return Err(NodeError::ChannelNameTooLong { len: name.len(), max });
        }
        Ok(self.chunk_size - header)
    }

    /// Swap the content key for a stored profile's keypair. Returns the new
    /// content public key.
    pub fn load_profile(&self, name: &str) -> Result<PublicKey, NodeError> {
        let profile = self
            .store
            .get_profile(name)?
            .ok_or_else(|| NodeError::UnknownProfile(name.to_owned()))?;
        let public = profile.keypair.public();
        let previous = self.keys.swap_content(profile.keypair);
        tracing::info!(
            profile = name,
            key = %public.short_id(),
            previous = %previous.public().short_id(),
            "content key swapped"
        );
        Ok(public)
    }
}

pub struct Node {
    core: Arc<NodeCore>,
    registry: Arc<Registry>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    started: AtomicBool,
}

impl Node {
    /// Build a node. Fails if the attached transports leave no room for a
    /// chunk. The receiver yields every message this node consumes.
    pub fn new(
        config: WaypostConfig,
        store: Arc<dyn NodeStore>,
        keys: NodeKeys,
        registry: Arc<Registry>,
    ) -> Result<(Self, mpsc::Receiver<Delivery>), NodeError> {
        let transports = registry.build_transports(&config.network);
        let chunk_size = transports.chunk_size()?;
        let (sink, rx) = delivery_queue(config.delivery.queue_depth);
        let keys = Arc::new(keys);

        let chunker = Arc::new(Chunker::new(sink.clone()));
        let router = Arc::new(Router::new(
            store.clone(),
            keys.clone(),
            chunker.clone(),
            sink.clone(),
            config.routing.clone().into(),
        ));
        let sync = Arc::new(Synchronizer::new(
            store.clone(),
            keys.clone(),
            router.clone(),
            config.sync.channel_filter.clone(),
        ));

        tracing::info!(
            content = %keys.content_public().short_id(),
            routing = %keys.routing_public().short_id(),
            transports = ?transports.schemes(),
            chunk_size,
            "node created"
        );

        let (shutdown, _) = broadcast::channel(1);
        let core = Arc::new(NodeCore {
            config,
            store,
            keys,
            chunker,
            router,
            sync,
            transports,
            chunk_size,
            sink,
        });
        let node = Self {
            core,
            registry,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        };
        Ok((node, rx))
    }

    pub fn core(&self) -> &Arc<NodeCore> {
        &self.core
    }

    /// A fresh subscription to the stop signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.subscribe()
    }

    fn spawn(&self, name: &str, task: PolicyFuture) {
        let handle = tokio::spawn(task);
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push((name.to_owned(), handle)),
            Err(poisoned) => poisoned.into_inner().push((name.to_owned(), handle)),
        }
    }

    /// Start the reassembly loop (once) and each named policy.
    pub fn start(&self, policies: &[&str]) -> Result<(), NodeError> {
        // Resolve every name before spawning anything.
        let mut ready = Vec::with_capacity(policies.len());
        for name in policies {
            let ctor = self
                .registry
                .policy(name)
                .ok_or_else(|| NodeError::UnknownPolicy((*name).to_owned()))?;
            ready.push((*name, ctor(self.core.clone(), self.shutdown_signal())?));
        }

        if !self.started.swap(true, Ordering::SeqCst) {
            let chunker = self.core.chunker.clone();
            self.spawn("reassembly", Box::pin(chunker.run(self.shutdown_signal())));
        }
        for (name, task) in ready {
            tracing::info!(policy = name, "policy starting");
            self.spawn(name, task);
        }
        Ok(())
    }

    /// Serve a surface on `addr` with the primary transport.
    pub fn listen(&self, addr: &str, admin: bool) -> Result<(), NodeError> {
        let transport = self.core.transports.primary().ok_or(NodeError::NoTransports)?;
        let task = rpc::serve(
            self.core.clone(),
            transport,
            addr.to_owned(),
            admin,
            self.shutdown_signal(),
        );
        self.spawn(if admin { "admin-listener" } else { "listener" }, task);
        Ok(())
    }

    /// Poll one peer URI on the discovery interval until stop.
    pub fn spawn_peer_loop(&self, uri: &str) -> Result<(), NodeError> {
        let (scheme, host) = split_uri(uri);
        let transport = self
            .core
            .transports
            .get(scheme)
            .ok_or_else(|| NodeError::UnknownScheme(scheme.to_owned()))?;
        let peer = PeerLoop::new(
            self.core.sync.clone(),
            transport,
            host,
            secs(self.core.config.discovery.peer_poll_interval_secs),
        );
        self.spawn(uri, Box::pin(peer.run(self.shutdown_signal())));
        Ok(())
    }

    pub fn send(&self, contact: &str, content: &[u8]) -> Result<usize, NodeError> {
        self.core.send(contact, content)
    }

    pub fn send_channel(&self, name: &str, content: &[u8]) -> Result<usize, NodeError> {
        self.core.send_channel(name, content)
    }

    pub fn load_profile(&self, name: &str) -> Result<PublicKey, NodeError> {
        self.core.load_profile(name)
    }

    /// Signal every task and wait for them to exit. The node may be started
    /// again afterwards.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                tracing::error!("{} exited: {:?}", name, e);
            }
        }
        self.started.store(false, Ordering::SeqCst);
        self.core.sink.log_stats();
        self.core.sync.log_peer_stats();
        tracing::info!("node stopped");
    }
}
