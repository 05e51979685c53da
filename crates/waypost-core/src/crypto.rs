//! Cryptographic primitives for waypost.
//!
//! Every envelope and every bundle is a sealed box: a one-way Noise `N`
//! handshake to the recipient's static X25519 key, followed by the plaintext
//! in transport-mode segments. The handshake message carries an authenticated
//! empty payload, so verifying it is the cheap "is this addressed to me" check
//! that routing runs against every candidate key before committing to a full
//! decrypt.
//!
//! Two key families exist and are tagged on the wire:
//!   0x01  Noise_N_25519_ChaChaPoly_BLAKE2s
//!   0x02  Noise_N_25519_AESGCM_SHA256
//!
//! Private key material lives in `Zeroizing` buffers and is wiped on drop.

use serde::{Deserialize, Serialize};
use snow::params::NoiseParams;
use snow::Builder;
use thiserror::Error;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

// ── Constants ─────────────────────────────────────────────────────────────────

/// X25519 key length, public or private.
pub const KEY_LEN: usize = 32;

/// Poly1305 / GCM tag length.
pub const TAG_LEN: usize = 16;

/// Ephemeral public key plus the tag over the empty handshake payload.
pub const HANDSHAKE_LEN: usize = KEY_LEN + TAG_LEN;

/// Largest Noise message, and therefore the largest sealed segment.
pub const MAX_SEGMENT: usize = 65535;

/// Plaintext carried by one full segment.
pub const MAX_SEGMENT_PLAINTEXT: usize = MAX_SEGMENT - TAG_LEN;

/// Shortest possible sealed box: handshake plus one empty segment.
pub const MIN_SEALED_LEN: usize = HANDSHAKE_LEN + TAG_LEN;

/// Key-derivation context for passphrase channels.
const CHANNEL_KDF_CONTEXT: &str = "waypost 2026-01 channel passphrase key";

// ── Key families ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyFamily {
    #[serde(rename = "chacha")]
    X25519ChaCha = 0x01,
    #[serde(rename = "aes")]
    X25519Aes = 0x02,
}

impl KeyFamily {
    pub fn from_u8(v: u8) -> Result<Self, CryptoError> {
        match v {
            0x01 => Ok(Self::X25519ChaCha),
            0x02 => Ok(Self::X25519Aes),
            other => Err(CryptoError::UnknownFamily(other)),
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            Self::X25519ChaCha => "Noise_N_25519_ChaChaPoly_BLAKE2s",
            Self::X25519Aes => "Noise_N_25519_AESGCM_SHA256",
        }
    }

    fn params(self) -> Result<NoiseParams, CryptoError> {
        Ok(self.pattern().parse()?)
    }
}

impl Default for KeyFamily {
    fn default() -> Self {
        Self::X25519ChaCha
    }
}

// ── Public keys ───────────────────────────────────────────────────────────────

/// A recipient's public key, tagged with its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    pub family: KeyFamily,
    pub key: [u8; KEY_LEN],
}

impl PublicKey {
    /// Wire form: family byte followed by the 32 key bytes.
    pub fn to_bytes(&self) -> [u8; 1 + KEY_LEN] {
        let mut out = [0u8; 1 + KEY_LEN];
        out[0] = self.family as u8;
        out[1..].copy_from_slice(&self.key);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 1 + KEY_LEN {
            return Err(CryptoError::BadKeyLength(bytes.len()));
        }
        let family = KeyFamily::from_u8(bytes[0])?;
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self { family, key })
    }

    /// Truncated hex for log lines.
    pub fn short_id(&self) -> String {
        hex::encode(&self.key[..8])
    }

    /// Seal `plaintext` so that only the holder of the matching private key
    /// can open it.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut hs = Builder::new(self.family.params()?)
            .remote_public_key(&self.key)
            .build_initiator()?;

        let mut out = Vec::with_capacity(sealed_len(plaintext.len()));
        let mut msg = [0u8; HANDSHAKE_LEN];
        let n = hs.write_message(&[], &mut msg)?;
        out.extend_from_slice(&msg[..n]);

        let mut transport = hs.into_transport_mode()?;
        let mut segment = vec![0u8; MAX_SEGMENT];
        for piece in segments(plaintext) {
            let n = transport.write_message(piece, &mut segment)?;
            out.extend_from_slice(&segment[..n]);
        }
        Ok(out)
    }
}

/// Split plaintext into segment-sized pieces. Empty input still yields one
/// (empty) segment so every sealed box carries at least one body tag.
fn segments(plaintext: &[u8]) -> Vec<&[u8]> {
    if plaintext.is_empty() {
        vec![plaintext]
    } else {
        plaintext.chunks(MAX_SEGMENT_PLAINTEXT).collect()
    }
}

/// Exact sealed size for a plaintext of `n` bytes.
pub fn sealed_len(n: usize) -> usize {
    let segments = n.div_ceil(MAX_SEGMENT_PLAINTEXT).max(1);
    HANDSHAKE_LEN + n + segments * TAG_LEN
}

/// Bytes added by sealing a plaintext of `n` bytes.
pub fn seal_overhead(n: usize) -> usize {
    sealed_len(n) - n
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// An X25519 keypair of a given family.
///
/// Used for the node's content and routing identities, for channels (where
/// the keypair is shared by every member) and for profiles.
#[derive(Clone)]
pub struct Keypair {
    family: KeyFamily,
    /// Zeroized on drop, never exposed directly.
    private: Zeroizing<[u8; KEY_LEN]>,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate(family: KeyFamily) -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        Self::from_private(family, secret.to_bytes())
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(family: KeyFamily, private_bytes: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            family,
            private: Zeroizing::new(secret.to_bytes()),
            public: PublicKey {
                family,
                key: *public.as_bytes(),
            },
        }
    }

    /// Derive a keypair from a passphrase. Every node deriving with the same
    /// name and passphrase gets the same key.
    pub fn from_passphrase(family: KeyFamily, name: &str, passphrase: &str) -> Self {
        let mut material = Zeroizing::new(Vec::with_capacity(name.len() + passphrase.len() + 1));
        material.extend_from_slice(name.as_bytes());
        material.push(0);
        material.extend_from_slice(passphrase.as_bytes());
        let seed = Zeroizing::new(blake3::derive_key(CHANNEL_KDF_CONTEXT, &material));
        Self::from_private(family, *seed)
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Serialized form for storage: family byte followed by the private key.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(1 + KEY_LEN));
        out.push(self.family as u8);
        out.extend_from_slice(&self.private[..]);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 1 + KEY_LEN {
            return Err(CryptoError::BadKeyLength(bytes.len()));
        }
        let family = KeyFamily::from_u8(bytes[0])?;
        let mut private = Zeroizing::new([0u8; KEY_LEN]);
        private.copy_from_slice(&bytes[1..]);
        Ok(Self::from_private(family, *private))
    }

    /// Verify only the handshake tag. `false` means the box was sealed to a
    /// different key.
    pub fn check_tag(&self, sealed: &[u8]) -> Result<bool, CryptoError> {
        Ok(self.handshake(sealed)?.is_some())
    }

    /// Open a sealed box. `Ok(None)` means "not for me"; an error means the
    /// box was addressed to this key but is malformed.
    pub fn open(&self, sealed: &[u8]) -> Result<Option<Vec<u8>>, CryptoError> {
        let Some(hs) = self.handshake(sealed)? else {
            return Ok(None);
        };
        let mut transport = hs.into_transport_mode()?;

        let body = &sealed[HANDSHAKE_LEN..];
        let mut out = Vec::with_capacity(body.len());
        let mut buf = vec![0u8; MAX_SEGMENT];
        for segment in body.chunks(MAX_SEGMENT) {
            if segment.len() < TAG_LEN {
                return Err(CryptoError::Corrupt);
            }
            let n = transport
                .read_message(segment, &mut buf)
                .map_err(|_| CryptoError::Corrupt)?;
            out.extend_from_slice(&buf[..n]);
        }
        Ok(Some(out))
    }

    fn handshake(&self, sealed: &[u8]) -> Result<Option<snow::HandshakeState>, CryptoError> {
        if sealed.len() < MIN_SEALED_LEN {
            return Err(CryptoError::TooShort(sealed.len()));
        }
        let mut hs = Builder::new(self.family.params()?)
            .local_private_key(&self.private[..])
            .build_responder()?;
        let mut payload = [0u8; HANDSHAKE_LEN];
        match hs.read_message(&sealed[..HANDSHAKE_LEN], &mut payload) {
            Ok(_) => Ok(Some(hs)),
            Err(snow::Error::Decrypt) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for Keypair {}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("family", &self.family)
            .field("public", &self.public.short_id())
            .finish_non_exhaustive()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown key family {0:#04x}")]
    UnknownFamily(u8),
    #[error("bad key length {0}")]
    BadKeyLength(usize),
    #[error("sealed box too short ({0} bytes)")]
    TooShort(usize),
    #[error("sealed box body failed authentication")]
    Corrupt,
    #[error("noise error: {0}")]
    Noise(#[from] snow::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
