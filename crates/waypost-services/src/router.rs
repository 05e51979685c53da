//! Router: decides what happens to one inbound envelope.
//!
//! For each envelope pulled out of a dropoff batch:
//!   1. parse the clear-text header (flags, channel name)
//!   2. drop it silently if its fingerprint is in the recent-message cache
//!   3. try to consume it with the keys the routing switches allow
//!   4. decide whether to forward, per key class and consumed/unconsumed
//!   5. apply channel redirection and append the forward to the outbox
//!
//! Consumed chunk records go to the chunker; everything else consumed goes
//! straight to the delivery sink.

use std::sync::{Arc, Mutex};

use waypost_core::config::RoutingConfig;
use waypost_core::crypto::CryptoError;
use waypost_core::time::now_nanos;
use waypost_core::wire::{self, Envelope, WireError};
use waypost_core::OutboxMsg;

use crate::chunker::{ChunkError, Chunker};
use crate::delivery::{Delivery, DeliverySink};
use crate::keys::NodeKeys;
use crate::recent::RecentCache;
use crate::store::{NodeStore, StoreError};

/// Which kind of key consumed a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    Content,
    Channel,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Seen recently; neither consumed nor forwarded.
    Duplicate,
    Routed {
        consumed: Option<KeyClass>,
        /// Outbox entries written, one per redirect target.
        forwarded: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

// ── Policy ────────────────────────────────────────────────────────────────────

/// The check/forward switches and the redirect list.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    config: RoutingConfig,
}

impl From<RoutingConfig> for RoutingPolicy {
    fn from(config: RoutingConfig) -> Self {
        Self { config }
    }
}

impl RoutingPolicy {
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Forward decision for one message.
    ///
    /// Consumed messages follow the consuming class's switch. Unconsumed
    /// channel traffic follows the channel switch. Unconsumed private traffic
    /// is forwarded only if every class that was tried agrees.
    pub fn should_forward(&self, is_channel: bool, consumed: Option<KeyClass>) -> bool {
        let c = &self.config;
        match consumed {
            Some(KeyClass::Content) => c.forward_consumed_content,
            Some(KeyClass::Channel) => c.forward_consumed_channels,
            Some(KeyClass::Profile) => c.forward_consumed_profiles,
            None if is_channel => c.forward_unknown_channels,
            None => {
                let mut forward = c.forward_unknown_content;
                if c.check_profiles {
                    forward &= c.forward_unknown_profiles;
                }
                forward
            }
        }
    }

    /// Outbound labels for traffic forwarded under `label`. `None` means
    /// no patch matched and the envelope goes out unchanged.
    pub fn redirect(&self, label: &str) -> Option<&[String]> {
        self.config
            .patches
            .iter()
            .find(|p| p.from == label)
            .map(|p| p.to.as_slice())
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

pub struct Router {
    store: Arc<dyn NodeStore>,
    keys: Arc<NodeKeys>,
    chunker: Arc<Chunker>,
    sink: DeliverySink,
    policy: RoutingPolicy,
    recent: Mutex<RecentCache>,
}

impl Router {
    pub fn new(
        store: Arc<dyn NodeStore>,
        keys: Arc<NodeKeys>,
        chunker: Arc<Chunker>,
        sink: DeliverySink,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            store,
            keys,
            chunker,
            sink,
            policy,
            recent: Mutex::new(RecentCache::new()),
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Record an envelope this node produced so its echo is ignored.
    pub fn remember(&self, envelope: &[u8]) -> Result<(), WireError> {
        let fp = Envelope::parse(envelope)?.fingerprint()?;
        self.recent().insert(fp);
        Ok(())
    }

    fn recent(&self) -> std::sync::MutexGuard<'_, RecentCache> {
        self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Route one inbound envelope.
    pub fn route(&self, raw: &[u8]) -> Result<RouteOutcome, RouteError> {
        let env = Envelope::parse(raw)?;
        let fp = env.fingerprint()?;

        if self.recent().check_and_insert(fp) {
            tracing::debug!(fp = hex::encode(&fp[..8]), "duplicate envelope dropped");
            return Ok(RouteOutcome::Duplicate);
        }

        let consumed = match self.try_consume(&env)? {
            Some((class, plaintext)) => {
                self.consume(class, &env, plaintext)?;
                Some(class)
            }
            None => None,
        };

        let forwarded = if self.policy.should_forward(env.flags.is_channel(), consumed) {
            self.forward(&env, raw)?
        } else {
            0
        };

        tracing::debug!(
            fp = hex::encode(&fp[..8]),
            channel = env.channel.unwrap_or(""),
            ?consumed,
            forwarded,
            "routed"
        );
        Ok(RouteOutcome::Routed {
            consumed,
            forwarded,
        })
    }

    fn try_consume(&self, env: &Envelope<'_>) -> Result<Option<(KeyClass, Vec<u8>)>, RouteError> {
        let cfg = self.policy.config();

        if let Some(name) = env.channel {
            if !cfg.check_channels {
                return Ok(None);
            }
            let channel = match self.store.get_channel(name) {
                Ok(Some(channel)) => channel,
                Ok(None) => return Ok(None),
                Err(e) => {
                    tracing::warn!(channel = name, error = %e, "channel lookup failed");
                    return Ok(None);
                }
            };
            return Ok(channel
                .keypair
                .open(env.ciphertext)?
                .map(|pt| (KeyClass::Channel, pt)));
        }

        if cfg.check_content {
            if let Some(pt) = self.keys.content().open(env.ciphertext)? {
                return Ok(Some((KeyClass::Content, pt)));
            }
        }

        if cfg.check_profiles {
            for profile in self.store.list_profiles()?.into_iter().filter(|p| p.enabled) {
                if let Some(pt) = profile.keypair.open(env.ciphertext)? {
                    tracing::debug!(profile = %profile.name, "consumed by profile");
                    return Ok(Some((KeyClass::Profile, pt)));
                }
            }
        }

        Ok(None)
    }

    fn consume(&self, class: KeyClass, env: &Envelope<'_>, plaintext: Vec<u8>) -> Result<(), RouteError> {
        if env.flags.is_chunk_record() {
            self.chunker.handle_chunked(env.flags, &plaintext, class)?;
        } else {
            self.sink.offer(Delivery {
                class,
                channel: env.channel.map(str::to_owned),
                content: plaintext,
            });
        }
        Ok(())
    }

    fn forward(&self, env: &Envelope<'_>, raw: &[u8]) -> Result<usize, RouteError> {
        let label = env.channel.unwrap_or("");

        let Some(targets) = self.policy.redirect(label) else {
            self.store.append_outbox(OutboxMsg {
                channel: label.to_owned(),
                data: raw.to_vec(),
                time: now_nanos(),
            })?;
            return Ok(1);
        };

        let mut written = 0;
        for target in targets {
            let channel = (!target.is_empty()).then_some(target.as_str());
            let data = match wire::rewrite_channel(raw, channel) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(from = label, to = %target, error = %e, "redirect skipped");
                    continue;
                }
            };
            self.store.append_outbox(OutboxMsg {
                channel: target.clone(),
                data,
                time: now_nanos(),
            })?;
            written += 1;
        }
        Ok(written)
    }
}
