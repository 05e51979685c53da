//! waypost wire format: the envelope and the chunking records carried inside it.
//!
//! These layouts ARE the protocol. Every node on the mesh parses them, so any
//! change here is a breaking change.
//!
//! Envelope:
//!   flags u8 | [name_len u16 BE | name bytes]  (only when IS_CHANNEL) | sealed box
//!
//! Stream header (plaintext of a STREAM_HEADER envelope):
//!   stream_id u32 BE | total_chunks u32 BE | channel name (rest, may be empty)
//!
//! Chunk (plaintext of a CHUNKED envelope):
//!   stream_id u32 BE | chunk_index u32 BE | payload (rest)
//!
//! The fixed prefixes are #[repr(C, packed)] zerocopy structs with big-endian
//! byte arrays, so parsing never depends on host endianness or alignment.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::crypto::{self, CryptoError, PublicKey};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Bytes of ciphertext used as a message fingerprint for loop detection.
pub const FINGERPRINT_LEN: usize = 16;

/// Room reserved for the per-chunk prefix when slicing content.
pub const CHUNK_HEADER_RESERVE: usize = std::mem::size_of::<ChunkPrefix>();

/// Room reserved for sealing and the envelope header when sizing chunks
/// against a transport byte limit.
pub const CRYPTO_RESERVE: usize = 1024;

/// Longest channel name the envelope's u16 length field can carry.
pub const MAX_CHANNEL_NAME: usize = u16::MAX as usize;

pub type Fingerprint = [u8; FINGERPRINT_LEN];

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Envelope flag byte.
///   bit 0: IS_CHANNEL     channel name field present, sealed to the channel key
///   bit 1: CHUNKED        plaintext is a chunk record
///   bit 2: STREAM_HEADER  plaintext is a stream header record
///   bits 3-7: reserved, must be zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvelopeFlags(u8);

impl EnvelopeFlags {
    pub const IS_CHANNEL: u8 = 0x01;
    pub const CHUNKED: u8 = 0x02;
    pub const STREAM_HEADER: u8 = 0x04;
    const KNOWN: u8 = Self::IS_CHANNEL | Self::CHUNKED | Self::STREAM_HEADER;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_channel(self) -> bool {
        self.0 & Self::IS_CHANNEL != 0
    }

    pub fn chunked(self) -> bool {
        self.0 & Self::CHUNKED != 0
    }

    pub fn stream_header(self) -> bool {
        self.0 & Self::STREAM_HEADER != 0
    }

    /// Either chunking flag: the plaintext belongs to the chunker.
    pub fn is_chunk_record(self) -> bool {
        self.chunked() || self.stream_header()
    }

    pub fn with_channel(self, on: bool) -> Self {
        self.set(Self::IS_CHANNEL, on)
    }

    pub fn with_chunked(self, on: bool) -> Self {
        self.set(Self::CHUNKED, on)
    }

    pub fn with_stream_header(self, on: bool) -> Self {
        self.set(Self::STREAM_HEADER, on)
    }

    fn set(self, bit: u8, on: bool) -> Self {
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }
}

impl TryFrom<u8> for EnvelopeFlags {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, WireError> {
        if v & !Self::KNOWN != 0 {
            return Err(WireError::ReservedFlags(v));
        }
        let flags = Self(v);
        if flags.chunked() && flags.stream_header() {
            return Err(WireError::ConflictingFlags(v));
        }
        Ok(flags)
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// A parsed envelope, borrowing from the raw bytes. Parsing never decrypts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub flags: EnvelopeFlags,
    /// Present iff `flags.is_channel()`.
    pub channel: Option<&'a str>,
    pub ciphertext: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, WireError> {
        let (&first, rest) = bytes.split_first().ok_or(WireError::Truncated)?;
        let flags = EnvelopeFlags::try_from(first)?;

        let (channel, ciphertext) = if flags.is_channel() {
            if rest.len() < 2 {
                return Err(WireError::Truncated);
            }
            let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            let rest = &rest[2..];
            if rest.len() < len {
                return Err(WireError::Truncated);
            }
            let name = std::str::from_utf8(&rest[..len]).map_err(|_| WireError::ChannelNameUtf8)?;
            if name.is_empty() {
                return Err(WireError::EmptyChannelName);
            }
            (Some(name), &rest[len..])
        } else {
            (None, rest)
        };

        Ok(Self {
            flags,
            channel,
            ciphertext,
        })
    }

    /// The loop-detection fingerprint: the first 16 ciphertext bytes. Those
    /// bytes are the sender's fresh ephemeral key, so they are unique per seal.
    pub fn fingerprint(&self) -> Result<Fingerprint, WireError> {
        if self.ciphertext.len() < FINGERPRINT_LEN {
            return Err(WireError::Truncated);
        }
        let mut fp = [0u8; FINGERPRINT_LEN];
        fp.copy_from_slice(&self.ciphertext[..FINGERPRINT_LEN]);
        Ok(fp)
    }
}

/// Build the clear-text envelope header: flags and, for channel messages,
/// the length-prefixed channel name. The IS_CHANNEL bit follows `channel`.
pub fn encode_header(flags: EnvelopeFlags, channel: Option<&str>) -> Result<Vec<u8>, WireError> {
    let flags = flags.with_channel(channel.is_some());
    EnvelopeFlags::try_from(flags.bits())?;
    let mut out = Vec::with_capacity(3 + channel.map_or(0, str::len));
    out.push(flags.bits());
    if let Some(name) = channel {
        if name.is_empty() {
            return Err(WireError::EmptyChannelName);
        }
        if name.len() > MAX_CHANNEL_NAME {
            return Err(WireError::ChannelNameTooLong(name.len()));
        }
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    Ok(out)
}

/// Seal `content` to `dest` and wrap it in an envelope.
pub fn seal_envelope(
    content: &[u8],
    dest: &PublicKey,
    flags: EnvelopeFlags,
    channel: Option<&str>,
) -> Result<Vec<u8>, WireError> {
    let mut out = encode_header(flags, channel)?;
    out.extend_from_slice(&dest.seal(content)?);
    Ok(out)
}

/// Re-tag an envelope with a different channel name, keeping its flags and
/// ciphertext. `None` turns it into a private envelope.
pub fn rewrite_channel(bytes: &[u8], channel: Option<&str>) -> Result<Vec<u8>, WireError> {
    let env = Envelope::parse(bytes)?;
    let mut out = encode_header(env.flags, channel)?;
    out.extend_from_slice(env.ciphertext);
    Ok(out)
}

/// Envelope size for `content_len` plaintext bytes under `channel`.
pub fn envelope_len(content_len: usize, channel: Option<&str>) -> usize {
    1 + channel.map_or(0, |c| 2 + c.len()) + crypto::sealed_len(content_len)
}

// ── Stream Header / Chunk ─────────────────────────────────────────────────────

/// Fixed prefix of a stream header record.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct StreamHeaderPrefix {
    /// Random per multi-chunk send, big-endian.
    pub stream_id: [u8; 4],
    /// Number of chunk records that follow, big-endian.
    pub total_chunks: [u8; 4],
}

assert_eq_size!(StreamHeaderPrefix, [u8; 8]);

/// Fixed prefix of a chunk record.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ChunkPrefix {
    pub stream_id: [u8; 4],
    /// Zero-based position of this chunk, big-endian.
    pub chunk_index: [u8; 4],
}

assert_eq_size!(ChunkPrefix, [u8; 8]);

/// Announces a multi-chunk stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub stream_id: u32,
    pub total_chunks: u32,
    /// Channel the reassembled message belongs to; empty for private.
    pub channel: String,
}

impl StreamHeader {
    pub fn encode(&self) -> Vec<u8> {
        let prefix = StreamHeaderPrefix {
            stream_id: self.stream_id.to_be_bytes(),
            total_chunks: self.total_chunks.to_be_bytes(),
        };
        let mut out = Vec::with_capacity(8 + self.channel.len());
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(self.channel.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let prefix = StreamHeaderPrefix::read_from_prefix(bytes).ok_or(WireError::Truncated)?;
        let rest = &bytes[std::mem::size_of::<StreamHeaderPrefix>()..];
        let channel = std::str::from_utf8(rest).map_err(|_| WireError::ChannelNameUtf8)?;
        let total_chunks = u32::from_be_bytes(prefix.total_chunks);
        if total_chunks == 0 {
            return Err(WireError::EmptyStream);
        }
        Ok(Self {
            stream_id: u32::from_be_bytes(prefix.stream_id),
            total_chunks,
            channel: channel.to_owned(),
        })
    }

    pub fn channel(&self) -> Option<&str> {
        if self.channel.is_empty() {
            None
        } else {
            Some(&self.channel)
        }
    }
}

/// One slice of a stream, borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub stream_id: u32,
    pub chunk_index: u32,
    pub payload: &'a [u8],
}

impl<'a> Chunk<'a> {
    pub fn encode(&self) -> Vec<u8> {
        let prefix = ChunkPrefix {
            stream_id: self.stream_id.to_be_bytes(),
            chunk_index: self.chunk_index.to_be_bytes(),
        };
        let mut out = Vec::with_capacity(CHUNK_HEADER_RESERVE + self.payload.len());
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(self.payload);
        out
    }

    pub fn decode(bytes: &'a [u8]) -> Result<Self, WireError> {
        let prefix = ChunkPrefix::read_from_prefix(bytes).ok_or(WireError::Truncated)?;
        Ok(Self {
            stream_id: u32::from_be_bytes(prefix.stream_id),
            chunk_index: u32::from_be_bytes(prefix.chunk_index),
            payload: &bytes[CHUNK_HEADER_RESERVE..],
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("truncated record")]
    Truncated,
    #[error("reserved flag bits set: {0:#04x}")]
    ReservedFlags(u8),
    #[error("CHUNKED and STREAM_HEADER both set: {0:#04x}")]
    ConflictingFlags(u8),
    #[error("channel name is not valid UTF-8")]
    ChannelNameUtf8,
    #[error("channel flag set with an empty channel name")]
    EmptyChannelName,
    #[error("channel name too long ({0} bytes)")]
    ChannelNameTooLong(usize),
    #[error("stream header declares zero chunks")]
    EmptyStream,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
