//! Configuration system for waypost.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WAYPOST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/waypost/config.toml
//!   3. ~/.config/waypost/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::crypto::KeyFamily;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypostConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub routing: RoutingConfig,
    pub sync: SyncConfig,
    pub discovery: DiscoveryConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Content keypair. Auto-generated on first run.
    pub content_key_path: PathBuf,
    /// Routing keypair. Auto-generated on first run.
    pub routing_key_path: PathBuf,
    /// Family used when generating new keys.
    pub key_family: KeyFamily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Public surface (Id, Pickup, Dropoff). Empty = don't listen.
    pub public_addr: String,
    /// Admin surface. Empty = don't listen.
    pub admin_addr: String,
    /// Largest frame a transport carries.
    pub byte_limit: usize,
    /// Read/write deadline for one RPC.
    pub rpc_timeout_secs: u64,
}

/// One redirection rule: traffic forwarded under `from` goes out under
/// every name in `to` instead. An empty name means private traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePatch {
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Try the content key on private messages.
    pub check_content: bool,
    /// Try known channel keys on channel messages.
    pub check_channels: bool,
    /// Try enabled profiles on private messages.
    pub check_profiles: bool,

    pub forward_consumed_content: bool,
    pub forward_unknown_content: bool,
    pub forward_consumed_channels: bool,
    pub forward_unknown_channels: bool,
    pub forward_consumed_profiles: bool,
    pub forward_unknown_profiles: bool,

    /// Ordered; first matching `from` wins.
    pub patches: Vec<RoutePatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    /// Each sleep is shortened by a random fraction up to this value.
    pub jitter: f64,
    /// Consecutive failures after which a peer URI is skipped.
    pub retry_ceiling: u32,
    /// Wrap back to the first group after the last one is exhausted.
    pub retry_forever: bool,
    /// Group order. Empty = every group seen in the peer list, sorted.
    pub groups: Vec<String>,
    /// Channels requested from peers. Empty = everything.
    pub channel_filter: Vec<String>,
    /// Outbox entries older than this are flushed.
    pub retention_secs: u64,
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Only takes effect when no peers are configured.
    pub enabled: bool,
    pub multicast_group: String,
    pub port: u16,
    pub advertise_interval_secs: u64,
    /// Poll interval for peers found by discovery.
    pub peer_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Bounded queue between the router and the consumer. Full = drop.
    pub queue_depth: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            content_key_path: config_dir().join("content.key"),
            routing_key_path: config_dir().join("routing.key"),
            key_family: KeyFamily::X25519ChaCha,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            public_addr: "0.0.0.0:7450".into(),
            admin_addr: "127.0.0.1:7451".into(),
            byte_limit: 1_048_576, // 1 MiB
            rpc_timeout_secs: 30,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            check_content: true,
            check_channels: true,
            check_profiles: false,
            forward_consumed_content: false,
            forward_unknown_content: true,
            forward_consumed_channels: true,
            forward_unknown_channels: true,
            forward_consumed_profiles: false,
            forward_unknown_profiles: true,
            patches: Vec::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            jitter: 0.2,
            retry_ceiling: 5,
            retry_forever: false,
            groups: Vec::new(),
            channel_filter: Vec::new(),
            retention_secs: 7 * 24 * 3600,
            flush_interval_secs: 300,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_group: "239.255.74.50".into(),
            port: 7452,
            advertise_interval_secs: 5,
            peer_poll_interval_secs: 10,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { queue_depth: 256 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("waypost")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WaypostConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from `path`, falling back to defaults if it does not exist. Env
    /// overrides still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_owned(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_owned(), e))?
        } else {
            WaypostConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WAYPOST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    /// Write the default config to `path` unless a file is already there.
    /// Returns whether it wrote.
    pub fn write_default_to(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_owned(), e))?;
        }
        let text = toml::to_string_pretty(&WaypostConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_owned(), e))?;
        Ok(true)
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.sync.jitter) {
            return Err(ConfigError::Invalid {
                key: "sync.jitter",
                reason: format!("{} is outside [0, 1)", self.sync.jitter),
            });
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "sync.poll_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.delivery.queue_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "delivery.queue_depth",
                reason: "must be at least 1".into(),
            });
        }
        if self.network.rpc_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "network.rpc_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Apply WAYPOST_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WAYPOST_NETWORK__PUBLIC_ADDR") {
            self.network.public_addr = v;
        }
        if let Ok(v) = std::env::var("WAYPOST_NETWORK__ADMIN_ADDR") {
            self.network.admin_addr = v;
        }
        env_parse("WAYPOST_NETWORK__BYTE_LIMIT", &mut self.network.byte_limit);
        env_parse("WAYPOST_NETWORK__RPC_TIMEOUT_SECS", &mut self.network.rpc_timeout_secs);
        env_bool("WAYPOST_ROUTING__CHECK_CONTENT", &mut self.routing.check_content);
        env_bool("WAYPOST_ROUTING__CHECK_CHANNELS", &mut self.routing.check_channels);
        env_bool("WAYPOST_ROUTING__CHECK_PROFILES", &mut self.routing.check_profiles);
        env_parse("WAYPOST_SYNC__POLL_INTERVAL_SECS", &mut self.sync.poll_interval_secs);
        env_parse("WAYPOST_SYNC__RETRY_CEILING", &mut self.sync.retry_ceiling);
        env_bool("WAYPOST_SYNC__RETRY_FOREVER", &mut self.sync.retry_forever);
        env_bool("WAYPOST_DISCOVERY__ENABLED", &mut self.discovery.enabled);
        env_parse("WAYPOST_DISCOVERY__PORT", &mut self.discovery.port);
        env_parse("WAYPOST_DELIVERY__QUEUE_DEPTH", &mut self.delivery.queue_depth);
    }
}

fn env_bool(key: &str, slot: &mut bool) {
    if let Ok(v) = std::env::var(key) {
        *slot = v == "true" || v == "1";
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}
