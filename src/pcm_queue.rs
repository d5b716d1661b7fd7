//! §4.A — PCM ring queue.
//!
//! Buffers producer-side audio chunks with O(1) enqueue and scatter-gather
//! dequeue of an arbitrary byte count. Modelled as a deque of owned byte
//! chunks plus a read offset into the head, per the "deque variant" design
//! note — this avoids the large memmoves a flat ring buffer would need on
//! every partial consume.

use std::collections::VecDeque;
use std::time::Instant;

/// 16 kHz mono, 16-bit signed little-endian PCM: 2 bytes per sample.
pub const BYTES_PER_SAMPLE: usize = 2;
/// Fixed sample rate the whole pipeline operates at.
pub const SAMPLE_RATE_HZ: u64 = 16_000;

/// Convert a millisecond duration to a byte count at the fixed PCM format.
///
/// Rounds down, with a floor of one byte so that a nonzero millisecond
/// value never silently becomes "take nothing".
#[must_use]
pub fn ms_to_bytes(ms: u32) -> usize {
    let bytes = (SAMPLE_RATE_HZ * BYTES_PER_SAMPLE as u64 * u64::from(ms)) / 1000;
    bytes.max(1) as usize
}

/// Convert a byte count to the millisecond duration it represents.
#[must_use]
pub fn bytes_to_ms(bytes: usize) -> u32 {
    let bytes_per_ms = (SAMPLE_RATE_HZ * BYTES_PER_SAMPLE as u64) / 1000;
    if bytes_per_ms == 0 {
        return 0;
    }
    (bytes as u64 / bytes_per_ms) as u32
}

/// A chunk owned exclusively by the queue, with a cursor for partial
/// consumption from the head.
struct QueuedChunk {
    bytes: Vec<u8>,
    read_offset: usize,
    enqueued_at: Instant,
}

impl QueuedChunk {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.read_offset
    }
}

/// A freshly allocated contiguous slice taken from the queue, plus the
/// oldest `enqueued_at` of any chunk that contributed to it.
pub struct PendingSlice {
    pub bytes: Vec<u8>,
    pub oldest_enqueued_at: Instant,
}

/// The producer-fed PCM ring queue described in §4.A.
pub struct PcmQueue {
    chunks: VecDeque<QueuedChunk>,
    pending_bytes: usize,
    /// Append-only copy of every enqueued byte, retained for an optional
    /// end-of-session final-pass re-transcription (§4.G, §9).
    full_audio: Vec<u8>,
}

impl PcmQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            pending_bytes: 0,
            full_audio: Vec::new(),
        }
    }

    /// Enqueue a producer chunk. O(1) besides the copy into `full_audio`.
    pub fn enqueue(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.full_audio.extend_from_slice(bytes);
        self.pending_bytes += bytes.len();
        self.chunks.push_back(QueuedChunk {
            bytes: bytes.to_vec(),
            read_offset: 0,
            enqueued_at: Instant::now(),
        });
    }

    /// Drain exactly `n_bytes` (or all pending bytes if fewer are
    /// available and the caller is force-flushing — callers pass
    /// `n_bytes.min(pending_bytes())` for that case) across possibly
    /// multiple head chunks.
    pub fn take(&mut self, n_bytes: usize) -> Option<PendingSlice> {
        if n_bytes == 0 || self.pending_bytes == 0 {
            return None;
        }
        let take_n = n_bytes.min(self.pending_bytes);
        let mut out = Vec::with_capacity(take_n);
        let mut oldest: Option<Instant> = None;
        let mut remaining = take_n;

        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            oldest = Some(oldest.map_or(front.enqueued_at, |o| o.min(front.enqueued_at)));

            let avail = front.remaining();
            let take_here = avail.min(remaining);
            out.extend_from_slice(
                &front.bytes[front.read_offset..front.read_offset + take_here],
            );
            front.read_offset += take_here;
            remaining -= take_here;

            if front.remaining() == 0 {
                self.chunks.pop_front();
            }
        }

        self.pending_bytes -= out.len();
        oldest.map(|oldest_enqueued_at| PendingSlice {
            bytes: out,
            oldest_enqueued_at,
        })
    }

    #[must_use]
    pub const fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// The full session audio buffer accumulated so far (for final-pass
    /// re-transcription). Bounded naturally by session duration since it
    /// is only ever appended to, never copied beyond what was ingested.
    #[must_use]
    pub fn full_audio(&self) -> &[u8] {
        &self.full_audio
    }

    /// Reset all state. Invoked on session end.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pending_bytes = 0;
        self.full_audio.clear();
    }
}

impl Default for PcmQueue {
    fn default() -> Self {
        Self::new()
    }
}
