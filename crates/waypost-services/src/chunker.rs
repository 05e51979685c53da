//! Chunker: splits oversized content into enveloped pieces and reassembles
//! them on the receiving side.
//!
//! A multi-chunk send is one STREAM_HEADER record announcing
//! `(stream_id, total_chunks, channel)` followed by `total_chunks` CHUNKED
//! records. Records arrive in any order and any may arrive more than once.
//! The reassembly loop fires a stream exactly once, when it has a header and
//! exactly `total_chunks` distinct chunks, then forgets the stream and
//! remembers its id so late copies are ignored.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use waypost_core::wire::{
    Chunk, EnvelopeFlags, StreamHeader, WireError, CHUNK_HEADER_RESERVE, CRYPTO_RESERVE,
};

use crate::delivery::{Delivery, DeliverySink};
use crate::router::KeyClass;

/// How often the reassembly loop wakes.
pub const REASSEMBLY_INTERVAL: Duration = Duration::from_millis(10);

/// Incomplete streams older than this are discarded.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Chunks kept for a stream whose header has not arrived yet.
pub const MAX_ORPHAN_CHUNKS: usize = 64;

/// Incomplete streams held at once. Records for further new streams are
/// dropped until some complete or are evicted.
pub const MAX_PENDING_STREAMS: usize = 1024;

/// Stale-stream sweep runs once per this many reassembly ticks.
const EVICT_EVERY_TICKS: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("no transports attached")]
    NoTransports,
    #[error("transport byte limit {limit} is at or below the {reserve}-byte crypto reserve")]
    LimitTooSmall { limit: usize, reserve: usize },
    #[error("chunk size {0} cannot hold the chunk header")]
    SizeTooSmall(usize),
    #[error("content needs more than u32::MAX chunks")]
    TooManyChunks,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Largest plaintext that fits one envelope on every attached transport.
pub fn chunk_size(limits: impl IntoIterator<Item = usize>) -> Result<usize, ChunkError> {
    let limit = limits.into_iter().min().ok_or(ChunkError::NoTransports)?;
    if limit <= CRYPTO_RESERVE {
        return Err(ChunkError::LimitTooSmall {
            limit,
            reserve: CRYPTO_RESERVE,
        });
    }
    Ok(limit - CRYPTO_RESERVE)
}

/// One record to be enveloped and sealed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub flags: EnvelopeFlags,
    pub plaintext: Vec<u8>,
}

/// Split `content` into a stream header followed by its chunks.
pub fn split(content: &[u8], chunk_size: usize, channel: Option<&str>) -> Result<Vec<Piece>, ChunkError> {
    if chunk_size <= CHUNK_HEADER_RESERVE {
        return Err(ChunkError::SizeTooSmall(chunk_size));
    }
    let slice = chunk_size - CHUNK_HEADER_RESERVE;
    let slices: Vec<&[u8]> = if content.is_empty() {
        vec![content]
    } else {
        content.chunks(slice).collect()
    };
    let total = u32::try_from(slices.len()).map_err(|_| ChunkError::TooManyChunks)?;
    let stream_id: u32 = rand::random();

    let mut pieces = Vec::with_capacity(slices.len() + 1);
    pieces.push(Piece {
        flags: EnvelopeFlags::empty().with_stream_header(true),
        plaintext: StreamHeader {
            stream_id,
            total_chunks: total,
            channel: channel.unwrap_or_default().to_owned(),
        }
        .encode(),
    });
    for (index, payload) in (0u32..).zip(slices) {
        pieces.push(Piece {
            flags: EnvelopeFlags::empty().with_chunked(true),
            plaintext: Chunk {
                stream_id,
                chunk_index: index,
                payload,
            }
            .encode(),
        });
    }
    Ok(pieces)
}

// ── Reassembly ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Header {
    total: u32,
    channel: Option<String>,
    class: KeyClass,
}

#[derive(Debug)]
struct Stream {
    header: Option<Header>,
    chunks: BTreeMap<u32, Vec<u8>>,
    started: Instant,
}

impl Stream {
    fn new() -> Self {
        Self {
            header: None,
            chunks: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    fn complete(&self) -> bool {
        self.header
            .as_ref()
            .is_some_and(|h| self.chunks.len() == h.total as usize)
    }
}

pub struct Chunker {
    streams: DashMap<u32, Stream>,
    /// Recently fired stream ids.
    completed: DashMap<u32, Instant>,
    sink: DeliverySink,
}

impl Chunker {
    pub fn new(sink: DeliverySink) -> Self {
        Self {
            streams: DashMap::new(),
            completed: DashMap::new(),
            sink,
        }
    }

    /// Record one decrypted chunk or stream header.
    pub fn handle_chunked(
        &self,
        flags: EnvelopeFlags,
        plaintext: &[u8],
        class: KeyClass,
    ) -> Result<(), ChunkError> {
        if flags.stream_header() {
            let header = StreamHeader::decode(plaintext)?;
            let id = header.stream_id;
            if self.completed.contains_key(&id) {
                tracing::debug!(stream = id, "header for finished stream ignored");
                return Ok(());
            }
            if !self.admit(id) {
                return Ok(());
            }
            let mut stream = self.streams.entry(id).or_insert_with(Stream::new);
            if stream.header.is_some() {
                return Ok(());
            }
            let total = header.total_chunks;
            stream.chunks.retain(|index, _| *index < total);
            stream.header = Some(Header {
                total,
                channel: header.channel().map(str::to_owned),
                class,
            });
            tracing::debug!(stream = id, total, "stream announced");
        } else if flags.chunked() {
            let chunk = Chunk::decode(plaintext)?;
            let id = chunk.stream_id;
            if self.completed.contains_key(&id) {
                tracing::debug!(stream = id, index = chunk.chunk_index, "chunk for finished stream ignored");
                return Ok(());
            }
            if !self.admit(id) {
                return Ok(());
            }
            let mut stream = self.streams.entry(id).or_insert_with(Stream::new);
            match &stream.header {
                Some(h) if chunk.chunk_index >= h.total => {
                    tracing::warn!(stream = id, index = chunk.chunk_index, total = h.total, "chunk index out of range");
                    return Ok(());
                }
                None if stream.chunks.len() >= MAX_ORPHAN_CHUNKS
                    && !stream.chunks.contains_key(&chunk.chunk_index) =>
                {
                    tracing::warn!(stream = id, index = chunk.chunk_index, "too many chunks before header, dropped");
                    return Ok(());
                }
                _ => {}
            }
            stream
                .chunks
                .entry(chunk.chunk_index)
                .or_insert_with(|| chunk.payload.to_vec());
        }
        Ok(())
    }

    /// Whether records for `id` may be held. Known streams always are; a new
    /// one only while under the pending cap.
    fn admit(&self, id: u32) -> bool {
        if self.streams.contains_key(&id) || self.streams.len() < MAX_PENDING_STREAMS {
            return true;
        }
        tracing::warn!(stream = id, pending = MAX_PENDING_STREAMS, "too many pending streams, record dropped");
        false
    }

    /// Fire every complete stream. Returns how many were delivered.
    pub fn reassemble_ready(&self) -> usize {
        let ready: Vec<u32> = self
            .streams
            .iter()
            .filter(|e| e.value().complete())
            .map(|e| *e.key())
            .collect();

        let mut delivered = 0;
        for id in ready {
            // Mark finished before removal so a racing late chunk cannot
            // recreate the stream.
            self.completed.insert(id, Instant::now());
            let Some((_, stream)) = self.streams.remove_if(&id, |_, s| s.complete()) else {
                self.completed.remove(&id);
                continue;
            };
            let Some(header) = stream.header else {
                continue;
            };

            let size = stream.chunks.values().map(Vec::len).sum();
            let mut content = Vec::with_capacity(size);
            for part in stream.chunks.into_values() {
                content.extend_from_slice(&part);
            }

            tracing::debug!(stream = id, chunks = header.total, bytes = size, "stream reassembled");
            if self.sink.offer(Delivery {
                class: header.class,
                channel: header.channel,
                content,
            }) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Discard incomplete streams and finished ids older than `age`.
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let mut evicted = 0;
        self.streams.retain(|id, s| {
            let keep = s.started.elapsed() < age;
            if !keep {
                evicted += 1;
                tracing::warn!(
                    stream = *id,
                    have = s.chunks.len(),
                    total = s.header.as_ref().map(|h| h.total),
                    "incomplete stream discarded"
                );
            }
            keep
        });
        self.completed.retain(|_, finished| finished.elapsed() < age);
        evicted
    }

    pub fn pending_streams(&self) -> usize {
        self.streams.len()
    }

    /// Reassembly loop. Runs until shutdown.
    pub async fn run(self: std::sync::Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = time::interval(REASSEMBLY_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        tracing::info!(interval_ms = REASSEMBLY_INTERVAL.as_millis() as u64, "reassembly loop starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("reassembly loop shutting down");
                    return;
                }

                _ = interval.tick() => {
                    self.reassemble_ready();
                    ticks += 1;
                    if ticks % EVICT_EVERY_TICKS == 0 {
                        self.evict_older_than(STREAM_TIMEOUT);
                    }
                }
            }
        }
    }
}
