//! §4.F — adaptive window scheduler.
//!
//! Decides whether enough audio has accumulated to invoke ASR, how many
//! bytes to take, and adjusts the dynamic window based on observed ASR
//! performance. The RMS/dBFS speech gate is grounded in the teacher's
//! `calculate_rms_energy` (`vad.rs`), adapted from a linear energy
//! threshold to the dBFS scale §4.F specifies.

use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::pcm_queue::{bytes_to_ms, ms_to_bytes};

/// EWMA smoothing factor for both `ewma_rtf` and `ewma_ms`.
const EWMA_ALPHA: f64 = 0.18;

/// Everything the adaptive scheduler needs to carry between calls: the
/// dynamic window estimate, the EWMA performance trackers, and the speech
/// gate's hangover timer.
pub struct WindowScheduler {
    min_window_ms: u32,
    normal_window_ms: u32,
    backlog_window_ms: u32,
    max_window_ms: u32,
    adaptive: bool,
    dynamic_normal_ms: u32,
    ewma_rtf: f64,
    ewma_ms: f64,
    silence_gate_dbfs: f32,
    speech_hangover_ms: u32,
    hangover_until: Option<Instant>,
}

impl WindowScheduler {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            min_window_ms: config.min_asr_window_ms,
            normal_window_ms: config.normal_asr_window_ms,
            backlog_window_ms: config.backlog_asr_window_ms,
            max_window_ms: config.max_asr_window_ms,
            adaptive: config.adaptive_asr_window,
            dynamic_normal_ms: config.normal_asr_window_ms,
            ewma_rtf: 0.0,
            ewma_ms: 0.0,
            silence_gate_dbfs: config.silence_gate_dbfs,
            speech_hangover_ms: config.speech_hangover_ms,
            hangover_until: None,
        }
    }

    /// How many bytes to take from the PCM queue right now, or `None` to
    /// defer (not enough audio yet, or genuinely nothing pending).
    ///
    /// `recording` distinguishes the live hot path (still accepting audio,
    /// so a too-small queue just waits) from drain's force-flush (take
    /// everything regardless of the minimum window).
    #[must_use]
    pub fn select_take_bytes(&self, pending_bytes: usize, recording: bool) -> Option<usize> {
        if pending_bytes == 0 {
            return None;
        }
        if recording && pending_bytes < ms_to_bytes(self.min_window_ms) {
            return None;
        }
        if !recording {
            return Some(pending_bytes);
        }

        let pending_ms = bytes_to_ms(pending_bytes);
        let baseline = if self.adaptive {
            self.dynamic_normal_ms
        } else {
            self.normal_window_ms
        };
        let mut target = baseline;
        if pending_ms >= 2 * self.backlog_window_ms {
            target = self.max_window_ms;
        } else if pending_ms >= self.backlog_window_ms {
            target = target.max(self.backlog_window_ms);
        }
        target = target.clamp(self.min_window_ms, self.max_window_ms);

        Some(pending_bytes.min(ms_to_bytes(target)))
    }

    /// Update the EWMA trackers after an ASR call completes, then — if
    /// adaptive windowing is enabled — adjust the dynamic window.
    pub fn record_asr_timing(&mut self, asr_elapsed_ms: u32, audio_ms: u32, pending_ms: u32) {
        let rtf = f64::from(asr_elapsed_ms) / f64::from(audio_ms.max(1));
        self.ewma_rtf = (1.0 - EWMA_ALPHA) * self.ewma_rtf + EWMA_ALPHA * rtf;
        self.ewma_ms = (1.0 - EWMA_ALPHA) * self.ewma_ms + EWMA_ALPHA * f64::from(asr_elapsed_ms);

        if !self.adaptive {
            return;
        }
        let mut next = i64::from(self.dynamic_normal_ms);
        if pending_ms >= self.backlog_window_ms || self.ewma_rtf > 1.0 {
            next += 24;
        }
        if pending_ms <= self.min_window_ms && self.ewma_rtf < 0.68 {
            next -= 10;
        }
        if pending_ms <= self.normal_window_ms / 2 && self.ewma_rtf < 0.80 {
            next -= 4;
        }
        let clamped = next.clamp(i64::from(self.min_window_ms), i64::from(self.max_window_ms));
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        {
            self.dynamic_normal_ms = clamped as u32;
        }
    }

    #[must_use]
    pub const fn ewma_rtf(&self) -> f64 {
        self.ewma_rtf
    }

    #[must_use]
    pub const fn ewma_ms(&self) -> f64 {
        self.ewma_ms
    }

    #[must_use]
    pub const fn dynamic_normal_ms(&self) -> u32 {
        self.dynamic_normal_ms
    }

    /// Speech gate: `true` keeps the slice (arms/extends the hangover or
    /// rides out an existing one); `false` means discard it without
    /// running ASR or touching the transcript buffers. The caller still
    /// counts the bytes for scheduling purposes either way.
    pub fn gate_slice(&mut self, pcm: &[u8], now: Instant) -> bool {
        let dbfs = rms_dbfs(pcm);
        if dbfs >= self.silence_gate_dbfs {
            self.hangover_until = Some(now + Duration::from_millis(u64::from(self.speech_hangover_ms)));
            return true;
        }
        matches!(self.hangover_until, Some(until) if now <= until)
    }

    /// Reset all per-session state (window, EWMAs, hangover). Invoked on
    /// session start.
    pub fn reset(&mut self, config: &PipelineConfig) {
        *self = Self::new(config);
    }
}

/// RMS level of 16-bit signed little-endian PCM, in dBFS (0 dBFS = a
/// full-scale sine, full silence floors at a very negative value rather
/// than `-inf`).
#[must_use]
pub fn rms_dbfs(pcm: &[u8]) -> f32 {
    if pcm.len() < 2 {
        return f32::NEG_INFINITY;
    }
    let sum_squares: f64 = pcm
        .chunks_exact(2)
        .map(|pair| {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            let normalized = f64::from(sample) / f64::from(i16::MAX);
            normalized * normalized
        })
        .sum();
    let n = (pcm.len() / 2) as f64;
    let rms = (sum_squares / n).sqrt();
    if rms <= 0.0 {
        return -100.0;
    }
    #[allow(clippy::cast_possible_truncation)]
    {
        (20.0 * rms.log10()) as f32
    }
}
