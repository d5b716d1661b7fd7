//! §4.C — ASR worker proxy.
//!
//! Presents one streaming interface over the four backend/statefulness
//! combinations in the capability matrix, hiding the wire-level request
//! shapes behind plain method calls. Grounded in the teacher's
//! `SttBackend`/`TtsBackend` trait split (`backend/mod.rs`): here there is
//! one concrete proxy rather than a trait object, since every backend
//! speaks the same framed protocol and only differs in which actions are
//! meaningful to send.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{AsrBackend, IpcTimeouts};
use crate::error::DictationError;
use crate::ipc::FramedTransport;

/// Context-lookback/lookahead window a stateful stream is configured with
/// at `start_stream` time (§6's `parakeet_stream_context_*` tunables).
#[derive(Debug, Clone, Copy)]
pub struct StreamContext {
    pub context_left: u32,
    pub context_right: u32,
    pub depth: u32,
}

/// Uniform streaming ASR interface over the framed transport.
///
/// `script-A`/`script-B` are addressed over the same framed transport as
/// the native backends here — the capability matrix's "json-line"
/// alternative for script backends is not implemented, since nothing in
/// this crate needs two transports live for one session.
pub struct AsrProxy {
    transport: FramedTransport,
    backend: AsrBackend,
    timeouts: IpcTimeouts,
}

impl AsrProxy {
    #[must_use]
    pub fn new(transport: FramedTransport, backend: AsrBackend, timeouts: IpcTimeouts) -> Self {
        Self {
            transport,
            backend,
            timeouts,
        }
    }

    /// Spawn the worker process, then issue the one-time warmup call.
    pub async fn warmup(&self, program: &str, args: &[String]) -> Result<(), DictationError> {
        self.transport.start(program, args).await?;
        self.transport
            .request("warmup", json!({}), Vec::new(), self.timeouts.warmup)
            .await?;
        Ok(())
    }

    /// Reset internal state and configure the context window. A no-op for
    /// stateless backends.
    pub async fn start_stream(
        &self,
        sample_rate: u32,
        context: StreamContext,
    ) -> Result<(), DictationError> {
        if !self.backend.is_stateful() {
            return Ok(());
        }
        self.transport
            .request(
                "start_stream",
                json!({
                    "sample_rate": sample_rate,
                    "context_left": context.context_left,
                    "context_right": context.context_right,
                    "depth": context.depth,
                }),
                Vec::new(),
                self.timeouts.stream_reset,
            )
            .await?;
        Ok(())
    }

    /// Transcribe one slice. Stateful backends accumulate context across
    /// calls; stateless backends treat each call independently. An empty
    /// or whitespace-only result means "no new text", not an error —
    /// callers should check with [`is_no_new_text`] rather than branching
    /// on `Err`.
    pub async fn push_stream(
        &self,
        audio: Vec<u8>,
        sample_rate: u32,
    ) -> Result<String, DictationError> {
        let result = self
            .transport
            .request(
                "push_stream",
                json!({ "sample_rate": sample_rate }),
                audio,
                self.timeouts.stream_push,
            )
            .await?;
        Ok(extract_text(&result))
    }

    /// Request the tail transcript held back by a stateful backend's
    /// internal context window. Returns an empty string immediately for
    /// stateless backends without a round trip (native-B never has a tail).
    pub async fn flush_stream(&self) -> Result<String, DictationError> {
        if !self.backend.is_stateful() {
            return Ok(String::new());
        }
        let result = self
            .transport
            .request("flush_stream", json!({}), Vec::new(), self.timeouts.stream_flush)
            .await?;
        Ok(extract_text(&result))
    }

    /// Tear down stream-local state without stopping the worker process.
    pub async fn stop_stream(&self) -> Result<(), DictationError> {
        if !self.backend.is_stateful() {
            return Ok(());
        }
        self.transport
            .request("stop_stream", json!({}), Vec::new(), self.timeouts.stream_close)
            .await?;
        Ok(())
    }

    /// One-shot transcription of a complete buffer, independent of any
    /// live stream state (§4.G final-pass re-transcription).
    pub async fn transcribe(&self, audio: Vec<u8>, sample_rate: u32) -> Result<String, DictationError> {
        let result = self
            .transport
            .request(
                "transcribe",
                json!({ "sample_rate": sample_rate }),
                audio,
                self.timeouts.transcribe,
            )
            .await?;
        Ok(extract_text(&result))
    }

    /// Gracefully terminate the worker process.
    pub async fn shutdown(&self) -> Result<(), DictationError> {
        self.transport.stop(self.timeouts.stop_grace).await
    }
}

/// The orchestrator's view of an ASR worker, kept separate from
/// [`AsrProxy`]'s inherent methods so tests can substitute an in-process
/// stub instead of spawning a real child process (mirrors the teacher's
/// trait-object seam around `SttBackend`/`TtsBackend`).
#[async_trait]
pub trait AsrWorker: Send + Sync {
    async fn warmup(&self, program: &str, args: &[String]) -> Result<(), DictationError>;
    async fn start_stream(
        &self,
        sample_rate: u32,
        context: StreamContext,
    ) -> Result<(), DictationError>;
    async fn push_stream(&self, audio: Vec<u8>, sample_rate: u32) -> Result<String, DictationError>;
    async fn flush_stream(&self) -> Result<String, DictationError>;
    async fn stop_stream(&self) -> Result<(), DictationError>;
    async fn transcribe(&self, audio: Vec<u8>, sample_rate: u32) -> Result<String, DictationError>;
    async fn shutdown(&self) -> Result<(), DictationError>;
}

#[async_trait]
impl AsrWorker for AsrProxy {
    async fn warmup(&self, program: &str, args: &[String]) -> Result<(), DictationError> {
        Self::warmup(self, program, args).await
    }

    async fn start_stream(
        &self,
        sample_rate: u32,
        context: StreamContext,
    ) -> Result<(), DictationError> {
        Self::start_stream(self, sample_rate, context).await
    }

    async fn push_stream(&self, audio: Vec<u8>, sample_rate: u32) -> Result<String, DictationError> {
        Self::push_stream(self, audio, sample_rate).await
    }

    async fn flush_stream(&self) -> Result<String, DictationError> {
        Self::flush_stream(self).await
    }

    async fn stop_stream(&self) -> Result<(), DictationError> {
        Self::stop_stream(self).await
    }

    async fn transcribe(&self, audio: Vec<u8>, sample_rate: u32) -> Result<String, DictationError> {
        Self::transcribe(self, audio, sample_rate).await
    }

    async fn shutdown(&self) -> Result<(), DictationError> {
        Self::shutdown(self).await
    }
}

/// Whether a transcript result should be treated as carrying no new text
/// (§4.C's "empty or whitespace-only is not an error" contract).
#[must_use]
pub fn is_no_new_text(text: &str) -> bool {
    text.trim().is_empty()
}

fn extract_text(value: &Value) -> String {
    value
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_text_is_not_new_text() {
        assert!(is_no_new_text(""));
        assert!(is_no_new_text("   \t  "));
        assert!(!is_no_new_text("hello"));
    }

    #[test]
    fn extract_text_defaults_to_empty_when_field_missing() {
        assert_eq!(extract_text(&json!({})), "");
        assert_eq!(extract_text(&json!({"text": "hi"})), "hi");
    }

    #[tokio::test]
    async fn stateless_backend_start_stream_and_stop_stream_are_noops() {
        let proxy = AsrProxy::new(
            FramedTransport::new(),
            AsrBackend::NativeB,
            IpcTimeouts::default(),
        );
        // Never started; a stateful call here would error, but these must
        // short-circuit before touching the (unstarted) transport.
        proxy
            .start_stream(16_000, StreamContext { context_left: 2, context_right: 1, depth: 4 })
            .await
            .unwrap();
        proxy.stop_stream().await.unwrap();
        assert_eq!(proxy.flush_stream().await.unwrap(), "");
    }
}
