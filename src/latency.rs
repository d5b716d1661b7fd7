//! §4.H — latency accumulator.
//!
//! Collects one [`LatencySample`] per ASR call and reduces a completed
//! session's samples into a percentile summary at drain time.

use serde::{Deserialize, Serialize};

/// One completed slice's timing breakdown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencySample {
    /// Time the slice spent sitting in the ingestion queue before ASR saw it.
    pub queue_ms: u32,
    /// Duration of audio in the slice.
    pub audio_ms: u32,
    /// Wall-clock time the ASR call itself took.
    pub asr_ms: u32,
    /// Wall-clock time the injector call took.
    pub inject_ms: u32,
    /// Total time from enqueue to injected.
    pub end_to_end_ms: u32,
}

/// `{p50, p95, max, avg}`, all rounded to integer milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentileSummary {
    pub p50: u32,
    pub p95: u32,
    pub max: u32,
    pub avg: u32,
}

/// The reduced summary of an entire session's latency samples.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub slices: usize,
    pub queue_ms: PercentileSummary,
    pub asr_ms: PercentileSummary,
    pub inject_ms: PercentileSummary,
    pub end_to_end_ms: PercentileSummary,
}

/// Accumulates [`LatencySample`]s for the duration of a session.
#[derive(Debug, Default)]
pub struct LatencyAccumulator {
    samples: Vec<LatencySample>,
}

impl LatencyAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn push(&mut self, sample: LatencySample) {
        self.samples.push(sample);
    }

    /// Reduce all collected samples into percentile summaries. Empty input
    /// summarises to all zeros.
    #[must_use]
    pub fn summarize(&self) -> LatencySummary {
        LatencySummary {
            slices: self.samples.len(),
            queue_ms: percentiles(self.samples.iter().map(|s| s.queue_ms)),
            asr_ms: percentiles(self.samples.iter().map(|s| s.asr_ms)),
            inject_ms: percentiles(self.samples.iter().map(|s| s.inject_ms)),
            end_to_end_ms: percentiles(self.samples.iter().map(|s| s.end_to_end_ms)),
        }
    }
}

/// `p` is the value at index `max(0, ceil(n·p) - 1)` of the ascending-sorted
/// samples (§4.H).
fn percentiles(values: impl Iterator<Item = u32>) -> PercentileSummary {
    let mut sorted: Vec<u32> = values.collect();
    if sorted.is_empty() {
        return PercentileSummary::default();
    }
    sorted.sort_unstable();

    let n = sorted.len();
    let idx_for = |p: f64| -> usize {
        let raw = (n as f64 * p).ceil() as i64 - 1;
        raw.max(0) as usize
    };

    let sum: u64 = sorted.iter().map(|&v| u64::from(v)).sum();
    #[allow(clippy::cast_possible_truncation)]
    let avg = (sum as f64 / n as f64).round() as u32;

    PercentileSummary {
        p50: sorted[idx_for(0.50)],
        p95: sorted[idx_for(0.95)],
        max: *sorted.last().unwrap(),
        avg,
    }
}
