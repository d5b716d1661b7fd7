//! §6 — external collaborator contracts.
//!
//! The orchestrator is written entirely against these traits so a host can
//! supply real adapters (a cpal/rodio capture device, an OS text injector,
//! an LLM-backed formatter) while the core ships lightweight test doubles
//! for the same seams — the hexagonal "ports" split the teacher uses for
//! `SttBackend`/`TtsBackend` and `VoicePipelinePort`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::FormatMode;
use crate::error::DictationError;

/// Invoked by a [`Capture`] implementation once per captured chunk.
pub type ChunkCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Produces raw 16 kHz mono 16-bit little-endian PCM chunks.
#[async_trait]
pub trait Capture: Send + Sync {
    /// `chunk_ms` is caller-validated to lie in `[20, 2000]` by
    /// [`crate::config::PipelineConfig::validate`].
    async fn start_streaming(
        &self,
        chunk_ms: u32,
        on_chunk: ChunkCallback,
    ) -> Result<(), DictationError>;

    /// Idempotent. Must emit any tail chunk shorter than the configured
    /// length iff that tail is at least half the nominal chunk size.
    async fn stop(&self) -> Result<(), DictationError>;
}

/// Rewrites a finished transcript for presentation, optionally via an
/// LLM-backed service; free to return the input unchanged.
#[async_trait]
pub trait Formatter: Send + Sync {
    async fn warmup(&self) -> Result<(), DictationError>;
    async fn format(&self, mode: FormatMode, text: &str) -> Result<String, DictationError>;
    async fn shutdown(&self) -> Result<(), DictationError>;
}

/// Delivers finished text to wherever the user is typing.
#[async_trait]
pub trait Injector: Send + Sync {
    /// Appends `text` at the current cursor position.
    async fn inject(&self, text: &str) -> Result<(), DictationError>;

    /// Atomically replaces a known-recent suffix (`existing_trimmed`) with
    /// `replacement`. The default implementation is the documented
    /// fallback for injectors that cannot address past text: it simply
    /// injects `replacement` in place.
    async fn replace_recent_text(
        &self,
        existing_trimmed: &str,
        replacement: &str,
    ) -> Result<(), DictationError> {
        let _ = existing_trimmed;
        self.inject(replacement).await
    }
}

/// In-crate test doubles matching the shapes §8 describes: an ASR worker
/// that lowercases and echoes, a pass-through formatter, and a
/// `String`-backed injector that can actually exercise
/// `replace_recent_text`. Not `cfg(test)`-gated so the integration tests
/// under `tests/` (a separate crate that links this one normally) can use
/// them too.
pub mod stubs {

    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{Capture, ChunkCallback, Formatter, Injector};
    use crate::asr::{AsrWorker, StreamContext};
    use crate::config::FormatMode;
    use crate::error::DictationError;

    /// Echoes whatever bytes it's pushed back as lowercased ASCII text,
    /// one "word" per call, independent of statefulness.
    #[derive(Default)]
    pub struct EchoAsrWorker {
        pub started: Mutex<bool>,
    }

    #[async_trait]
    impl AsrWorker for EchoAsrWorker {
        async fn warmup(&self, _program: &str, _args: &[String]) -> Result<(), DictationError> {
            *self.started.lock().unwrap() = true;
            Ok(())
        }

        async fn start_stream(
            &self,
            _sample_rate: u32,
            _context: StreamContext,
        ) -> Result<(), DictationError> {
            Ok(())
        }

        async fn push_stream(
            &self,
            audio: Vec<u8>,
            _sample_rate: u32,
        ) -> Result<String, DictationError> {
            // Each byte-pair becomes one ASCII-ish "word" so tests can
            // assert on predictable, non-empty transcripts for non-silent
            // input without needing a real ASR engine.
            if audio.iter().all(|&b| b == 0) {
                return Ok(String::new());
            }
            Ok("word".to_string())
        }

        async fn flush_stream(&self) -> Result<String, DictationError> {
            Ok(String::new())
        }

        async fn stop_stream(&self) -> Result<(), DictationError> {
            Ok(())
        }

        async fn transcribe(&self, audio: Vec<u8>, _sample_rate: u32) -> Result<String, DictationError> {
            if audio.iter().all(|&b| b == 0) {
                return Ok(String::new());
            }
            Ok("word word".to_string())
        }

        async fn shutdown(&self) -> Result<(), DictationError> {
            Ok(())
        }
    }

    pub struct PassThroughFormatter;

    #[async_trait]
    impl Formatter for PassThroughFormatter {
        async fn warmup(&self) -> Result<(), DictationError> {
            Ok(())
        }

        async fn format(&self, _mode: FormatMode, text: &str) -> Result<String, DictationError> {
            Ok(text.to_string())
        }

        async fn shutdown(&self) -> Result<(), DictationError> {
            Ok(())
        }
    }

    /// Appends into an in-memory string; `replace_recent_text` actually
    /// rewrites the tail, unlike the trait's default fallback, so tests
    /// can observe the distinction.
    #[derive(Default)]
    pub struct StringInjector {
        pub buffer: Mutex<String>,
    }

    #[async_trait]
    impl Injector for StringInjector {
        async fn inject(&self, text: &str) -> Result<(), DictationError> {
            self.buffer.lock().unwrap().push_str(text);
            Ok(())
        }

        async fn replace_recent_text(
            &self,
            existing_trimmed: &str,
            replacement: &str,
        ) -> Result<(), DictationError> {
            let mut buffer = self.buffer.lock().unwrap();
            if let Some(pos) = buffer.rfind(existing_trimmed) {
                buffer.truncate(pos);
                buffer.push_str(replacement);
            } else {
                buffer.push_str(replacement);
            }
            Ok(())
        }
    }

    /// A [`Capture`] that never actually produces audio; present only so
    /// orchestrator tests that exercise `start`/`stop` without pushing
    /// chunks manually have something to construct.
    #[derive(Default)]
    pub struct NullCapture;

    #[async_trait]
    impl Capture for NullCapture {
        async fn start_streaming(
            &self,
            _chunk_ms: u32,
            _on_chunk: ChunkCallback,
        ) -> Result<(), DictationError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), DictationError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stubs::StringInjector;
    use super::Injector;

    #[tokio::test]
    async fn default_replace_recent_text_falls_back_to_inject() {
        struct InjectOnly(tokio::sync::Mutex<String>);

        #[async_trait::async_trait]
        impl super::Injector for InjectOnly {
            async fn inject(&self, text: &str) -> Result<(), crate::error::DictationError> {
                self.0.lock().await.push_str(text);
                Ok(())
            }
        }

        let injector = InjectOnly(tokio::sync::Mutex::new("hello world".into()));
        injector.replace_recent_text("world", "there").await.unwrap();
        assert_eq!(*injector.0.lock().await, "hello worldthere");
    }

    #[tokio::test]
    async fn string_injector_replace_recent_text_rewrites_tail() {
        let injector = StringInjector::default();
        injector.inject("hello world").await.unwrap();
        injector.replace_recent_text("world", "there").await.unwrap();
        assert_eq!(*injector.buffer.lock().unwrap(), "hello there");
    }
}
