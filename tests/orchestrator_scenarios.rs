//! End-to-end scenarios against the public `Orchestrator` API, using the
//! in-crate test doubles from `dictation_core::collaborators::stubs` plus a
//! small scripted ASR worker local to this file (the stubs' `EchoAsrWorker`
//! only echoes a fixed "word", which isn't expressive enough to script the
//! specific transcripts these scenarios need).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dictation_core::collaborators::stubs::{NullCapture, PassThroughFormatter, StringInjector};
use dictation_core::{AsrWorker, DictationError, Orchestrator, PipelineConfig, SessionStage, StreamContext};

/// Replays canned `push_stream` responses in order; `flush_stream` and
/// `transcribe` each return a separately configurable canned value.
#[derive(Default)]
struct ScriptedAsrWorker {
    push_responses: Mutex<VecDeque<String>>,
    flush_response: Mutex<String>,
    transcribe_response: Mutex<String>,
}

impl ScriptedAsrWorker {
    fn with_push_responses(responses: &[&str]) -> Self {
        Self {
            push_responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            flush_response: Mutex::new(String::new()),
            transcribe_response: Mutex::new(String::new()),
        }
    }

    fn with_transcribe_response(self, text: &str) -> Self {
        *self.transcribe_response.lock().unwrap() = text.to_string();
        self
    }
}

#[async_trait]
impl AsrWorker for ScriptedAsrWorker {
    async fn warmup(&self, _program: &str, _args: &[String]) -> Result<(), DictationError> {
        Ok(())
    }

    async fn start_stream(&self, _sample_rate: u32, _context: StreamContext) -> Result<(), DictationError> {
        Ok(())
    }

    async fn push_stream(&self, _audio: Vec<u8>, _sample_rate: u32) -> Result<String, DictationError> {
        Ok(self.push_responses.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn flush_stream(&self) -> Result<String, DictationError> {
        Ok(self.flush_response.lock().unwrap().clone())
    }

    async fn stop_stream(&self) -> Result<(), DictationError> {
        Ok(())
    }

    async fn transcribe(&self, _audio: Vec<u8>, _sample_rate: u32) -> Result<String, DictationError> {
        Ok(self.transcribe_response.lock().unwrap().clone())
    }

    async fn shutdown(&self) -> Result<(), DictationError> {
        Ok(())
    }
}

fn silence(n_samples: usize) -> Vec<u8> {
    vec![0u8; n_samples * 2]
}

fn tone(n_samples: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(n_samples * 2);
    for _ in 0..n_samples {
        bytes.extend_from_slice(&i16::MAX.to_le_bytes());
    }
    bytes
}

/// The test doubles here never genuinely suspend (no real I/O), so a
/// single-threaded runtime would otherwise run both `push_audio_chunk`
/// calls back-to-back before the spawned ASR loop task ever gets polled,
/// collapsing two intended windows into one force-flushed take at drain.
/// Yielding a few times between chunks gives that task room to run to
/// completion first, so each chunk really does land in its own ASR call.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn build(asr: ScriptedAsrWorker) -> (Arc<Orchestrator>, Arc<StringInjector>) {
    let injector = Arc::new(StringInjector::default());
    let orchestrator = Arc::new(Orchestrator::new(
        PipelineConfig::default(),
        Arc::new(NullCapture),
        Arc::new(asr),
        Arc::new(PassThroughFormatter),
        injector.clone(),
        Box::new(dictation_core::NoopEmitter),
    ));
    (orchestrator, injector)
}

#[tokio::test]
async fn trivial_flush_of_silence_yields_empty_transcript() {
    let (orchestrator, injector) = build(ScriptedAsrWorker::with_push_responses(&[]));
    orchestrator.handle_press().await.unwrap();
    Arc::clone(&orchestrator).push_audio_chunk(silence(1_600)).await;
    orchestrator.handle_release().await.unwrap();
    assert_eq!(*injector.buffer.lock().unwrap(), "");
    assert!(matches!(orchestrator.stage().await, SessionStage::Idle));
}

#[tokio::test]
async fn simple_overlap_drops_the_repeated_word_across_two_windows() {
    let (orchestrator, injector) =
        build(ScriptedAsrWorker::with_push_responses(&["hello world", "world today"]));
    orchestrator.handle_press().await.unwrap();
    Arc::clone(&orchestrator).push_audio_chunk(tone(16_000)).await;
    settle().await;
    Arc::clone(&orchestrator).push_audio_chunk(tone(16_000)).await;
    settle().await;
    orchestrator.handle_release().await.unwrap();
    assert_eq!(*injector.buffer.lock().unwrap(), "hello world today ");
}

#[tokio::test]
async fn overlap_across_windows_drops_the_recurring_prefix() {
    let (orchestrator, injector) = build(ScriptedAsrWorker::with_push_responses(&[
        "the quick brown fox",
        "quick brown fox jumps over",
    ]));
    orchestrator.handle_press().await.unwrap();
    Arc::clone(&orchestrator).push_audio_chunk(tone(16_000)).await;
    settle().await;
    Arc::clone(&orchestrator).push_audio_chunk(tone(16_000)).await;
    settle().await;
    orchestrator.handle_release().await.unwrap();
    assert_eq!(*injector.buffer.lock().unwrap(), "the quick brown fox jumps over ");
}

#[tokio::test]
async fn spoken_punctuation_is_rewritten_before_injection() {
    let (orchestrator, injector) = build(ScriptedAsrWorker::with_push_responses(&[
        "hello comma world full stop new line next",
    ]));
    orchestrator.handle_press().await.unwrap();
    Arc::clone(&orchestrator).push_audio_chunk(tone(16_000)).await;
    orchestrator.handle_release().await.unwrap();
    assert_eq!(*injector.buffer.lock().unwrap(), "hello, world.\nnext ");
}

#[tokio::test]
async fn final_pass_replaces_a_misheard_word_at_drain() {
    let mut cfg = PipelineConfig::default();
    cfg.parakeet_final_pass = true;
    let asr = ScriptedAsrWorker::with_push_responses(&["helo world"]).with_transcribe_response("hello world");
    let injector = Arc::new(StringInjector::default());
    let orchestrator = Arc::new(Orchestrator::new(
        cfg,
        Arc::new(NullCapture),
        Arc::new(asr),
        Arc::new(PassThroughFormatter),
        injector.clone(),
        Box::new(dictation_core::NoopEmitter),
    ));
    orchestrator.handle_press().await.unwrap();
    Arc::clone(&orchestrator).push_audio_chunk(tone(16_000)).await;
    orchestrator.handle_release().await.unwrap();
    assert_eq!(*injector.buffer.lock().unwrap(), "hello world");
}
