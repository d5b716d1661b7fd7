//! Pipeline tunables (§6) and the session's format mode.
//!
//! Loading these values from disk/env/CLI is a host-application concern;
//! this module only owns the in-memory shape, its defaults, and the
//! validation the orchestrator needs before it is safe to start a session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DictationError;

/// How spoken punctuation / text cleanup is applied to a finished transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatMode {
    /// No rewriting at all — raw ASR output verbatim.
    Literal,
    /// Spoken-punctuation rewrite plus whitespace normalisation only.
    Clean,
    /// `Clean`, followed by handing the text to the formatter collaborator
    /// for further (e.g. LLM-backed) rewriting.
    Rewrite,
}

impl Default for FormatMode {
    fn default() -> Self {
        Self::Clean
    }
}

/// Which ASR backend the worker proxy should address (§4.C capability
/// matrix). Carried here purely as a selector; the matrix itself lives in
/// [`crate::asr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrBackend {
    NativeA,
    NativeB,
    ScriptA,
    ScriptB,
}

impl AsrBackend {
    #[must_use]
    pub const fn is_stateful(self) -> bool {
        matches!(self, Self::NativeA | Self::ScriptA)
    }
}

/// Per-request IPC timeouts, keyed by action (§6 supplement — the source
/// spec gives a 10-120s range without naming the mapping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcTimeouts {
    pub warmup: Duration,
    pub transcribe: Duration,
    pub stream_reset: Duration,
    pub stream_push: Duration,
    pub stream_flush: Duration,
    pub stream_close: Duration,
    /// Grace period for graceful shutdown before escalating to a kill.
    pub stop_grace: Duration,
}

impl Default for IpcTimeouts {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(120),
            transcribe: Duration::from_secs(30),
            stream_reset: Duration::from_secs(10),
            stream_push: Duration::from_secs(30),
            stream_flush: Duration::from_secs(30),
            stream_close: Duration::from_secs(10),
            stop_grace: Duration::from_millis(1500),
        }
    }
}

/// All tunables the orchestrator and scheduler consult (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub asr_backend: AsrBackend,
    pub spoken_formatting_commands: bool,
    pub live_stream_chunk_ms: u32,
    pub min_asr_window_ms: u32,
    pub normal_asr_window_ms: u32,
    pub backlog_asr_window_ms: u32,
    pub max_asr_window_ms: u32,
    pub adaptive_asr_window: bool,
    pub parakeet_final_pass: bool,
    pub silence_gate_dbfs: f32,
    pub speech_hangover_ms: u32,
    pub parakeet_stream_context_left: u32,
    pub parakeet_stream_context_right: u32,
    pub parakeet_stream_depth: u32,
    pub ipc_timeouts: IpcTimeouts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            asr_backend: AsrBackend::NativeA,
            spoken_formatting_commands: true,
            live_stream_chunk_ms: 320,
            min_asr_window_ms: 800,
            normal_asr_window_ms: 2_000,
            backlog_asr_window_ms: 4_000,
            max_asr_window_ms: 8_000,
            adaptive_asr_window: true,
            parakeet_final_pass: false,
            silence_gate_dbfs: -52.0,
            speech_hangover_ms: 420,
            parakeet_stream_context_left: 2,
            parakeet_stream_context_right: 1,
            parakeet_stream_depth: 4,
            ipc_timeouts: IpcTimeouts::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate the monotonicity invariant on the window bounds and reject
    /// nonsensical chunk sizes before a session is allowed to start.
    pub fn validate(&self) -> Result<(), DictationError> {
        if !(self.min_asr_window_ms
            <= self.normal_asr_window_ms
            && self.normal_asr_window_ms <= self.backlog_asr_window_ms
            && self.backlog_asr_window_ms <= self.max_asr_window_ms)
        {
            return Err(DictationError::InvalidConfig(format!(
                "asr window bounds must be non-decreasing: min={} normal={} backlog={} max={}",
                self.min_asr_window_ms,
                self.normal_asr_window_ms,
                self.backlog_asr_window_ms,
                self.max_asr_window_ms
            )));
        }
        if !(20..=2000).contains(&self.live_stream_chunk_ms) {
            return Err(DictationError::InvalidConfig(format!(
                "live_stream_chunk_ms must be in [20, 2000], got {}",
                self.live_stream_chunk_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn non_monotonic_bounds_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.backlog_asr_window_ms = cfg.normal_asr_window_ms - 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn chunk_ms_out_of_range_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.live_stream_chunk_ms = 5;
        assert!(cfg.validate().is_err());
        cfg.live_stream_chunk_ms = 5000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn native_a_is_stateful_native_b_is_not() {
        assert!(AsrBackend::NativeA.is_stateful());
        assert!(!AsrBackend::NativeB.is_stateful());
    }
}
