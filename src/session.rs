//! §4.G — session orchestrator.
//!
//! Drives the Idle → Recording → Transcribing → Formatting → Injecting
//! state machine, owns the per-session mutable state behind a single
//! `tokio::sync::Mutex`, and runs the single-flight ASR loop that consumes
//! the PCM queue as the [`WindowScheduler`] allows. Grounded in the
//! teacher's `VoicePipeline` (`gglib-voice/src/pipeline.rs`): the
//! `set_state`/`emit` pair, the push-to-talk start/stop split, and the
//! "not active" idempotency guards all mirror that module, generalized
//! from a single-shot PTT transcription to a streaming, drain-and-format
//! pipeline.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};

use crate::asr::{is_no_new_text, AsrWorker, StreamContext};
use crate::collaborators::{Capture, Formatter, Injector};
use crate::config::{FormatMode, PipelineConfig};
use crate::dedup;
use crate::error::DictationError;
use crate::events::{SessionEvent, SessionEventEmitter, SessionStage};
use crate::latency::{LatencyAccumulator, LatencySample};
use crate::pcm_queue::{bytes_to_ms, PcmQueue};
use crate::rewriter;
use crate::scheduler::WindowScheduler;

/// Self-test phrase round-tripped through the formatter and injector by
/// [`Orchestrator::test_pipeline`] — never shown to a real user, so its
/// exact wording carries no meaning.
const SELF_TEST_TEXT: &str = "dictation pipeline self-test";

/// Everything the hot path and drain sequence mutate, behind one lock so a
/// single `.await` boundary never straddles an inconsistent view of it.
struct SessionState {
    stage: SessionStage,
    mode: FormatMode,
    recording: bool,
    release_in_progress: bool,
    asr_loop_running: bool,
    queue: PcmQueue,
    scheduler: WindowScheduler,
    latency: LatencyAccumulator,
    raw_parts: String,
    live_injected: String,
}

impl SessionState {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            stage: SessionStage::Idle,
            mode: FormatMode::default(),
            recording: false,
            release_in_progress: false,
            asr_loop_running: false,
            queue: PcmQueue::new(),
            scheduler: WindowScheduler::new(config),
            latency: LatencyAccumulator::new(),
            raw_parts: String::new(),
            live_injected: String::new(),
        }
    }
}

/// Drives one dictation session end to end. Cheap to share: clone the
/// `Arc<Orchestrator>` into the capture callback and any background task.
pub struct Orchestrator {
    config: PipelineConfig,
    capture: Arc<dyn Capture>,
    asr: Arc<dyn AsrWorker>,
    formatter: Arc<dyn Formatter>,
    injector: Arc<dyn Injector>,
    events: Box<dyn SessionEventEmitter>,
    state: Mutex<SessionState>,
    /// Wakes a parked ASR loop iteration when new audio arrives or
    /// recording stops (so a force-flush doesn't wait out the normal
    /// inter-chunk cadence).
    audio_available: Notify,
    /// Signalled once per ASR loop exit, so `drain` can wait for the
    /// queue to empty without polling.
    loop_finished: Notify,
}

impl Orchestrator {
    /// `config` must already satisfy [`PipelineConfig::validate`]; the
    /// orchestrator does not re-validate it.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        capture: Arc<dyn Capture>,
        asr: Arc<dyn AsrWorker>,
        formatter: Arc<dyn Formatter>,
        injector: Arc<dyn Injector>,
        events: Box<dyn SessionEventEmitter>,
    ) -> Self {
        let state = Mutex::new(SessionState::new(&config));
        Self {
            config,
            capture,
            asr,
            formatter,
            injector,
            events,
            state,
            audio_available: Notify::new(),
            loop_finished: Notify::new(),
        }
    }

    /// Spawn the ASR worker process and issue its one-time warmup call.
    /// Not tied to any one session — call once before the first
    /// [`Self::handle_press`].
    pub async fn warmup(&self, program: &str, args: &[String]) -> Result<(), DictationError> {
        self.asr.warmup(program, args).await
    }

    #[must_use]
    pub async fn stage(&self) -> SessionStage {
        self.state.lock().await.stage.clone()
    }

    /// Change the active format mode. Takes effect on the next drain;
    /// does not affect a session already mid-drain.
    pub async fn set_mode(&self, mode: FormatMode) {
        let mut state = self.state.lock().await;
        state.mode = mode;
        self.events.emit(SessionEvent::ModeChanged(mode));
    }

    // ── Push-to-talk flow ──────────────────────────────────────────

    /// Begin recording. Ignored (not an error) unless the session is
    /// `Idle` or `Error` — mirrors the teacher's `is_active()` guard,
    /// inverted, since here "not yet started" rather than "not active"
    /// is the resting state.
    pub async fn handle_press(self: &Arc<Self>) -> Result<(), DictationError> {
        let mut state = self.state.lock().await;
        if !matches!(state.stage, SessionStage::Idle | SessionStage::Error { .. }) {
            return Ok(());
        }

        state.queue.clear();
        state.scheduler.reset(&self.config);
        state.latency.reset();
        state.raw_parts.clear();
        state.live_injected.clear();
        state.recording = true;
        state.release_in_progress = false;

        let this = Arc::clone(self);
        let on_chunk: crate::collaborators::ChunkCallback = Arc::new(move |bytes| {
            let this = Arc::clone(&this);
            tokio::spawn(async move {
                this.push_audio_chunk(bytes).await;
            });
        });

        if let Err(err) = self
            .capture
            .start_streaming(self.config.live_stream_chunk_ms, on_chunk)
            .await
        {
            state.recording = false;
            self.set_stage(&mut state, SessionStage::from_error(&err));
            return Err(err);
        }

        if let Err(err) = self
            .asr
            .start_stream(
                crate::pcm_queue::SAMPLE_RATE_HZ as u32,
                StreamContext {
                    context_left: self.config.parakeet_stream_context_left,
                    context_right: self.config.parakeet_stream_context_right,
                    depth: self.config.parakeet_stream_depth,
                },
            )
            .await
        {
            state.recording = false;
            let _ = self.capture.stop().await;
            self.set_stage(&mut state, SessionStage::from_error(&err));
            return Err(err);
        }

        self.set_stage(&mut state, SessionStage::Recording);
        Ok(())
    }

    /// Stop recording and run the drain sequence. Idempotent: a second
    /// call while one is already in flight is a no-op.
    pub async fn handle_release(self: &Arc<Self>) -> Result<(), DictationError> {
        {
            let mut state = self.state.lock().await;
            if state.release_in_progress || !matches!(state.stage, SessionStage::Recording) {
                return Ok(());
            }
            state.release_in_progress = true;
            state.recording = false;
        }
        let result = self.drain().await;
        let mut state = self.state.lock().await;
        state.release_in_progress = false;
        if let Err(ref err) = result {
            self.set_stage(&mut state, SessionStage::from_error(err));
        }
        result
    }

    /// Round-trips a fixed diagnostic string through the formatter and
    /// injector without touching ASR or capture, so a host can verify the
    /// collaborator wiring before a user ever presses the talk key.
    pub async fn test_pipeline(&self) -> Result<(), DictationError> {
        let mut state = self.state.lock().await;
        if !matches!(state.stage, SessionStage::Idle) {
            return Err(DictationError::InvalidTransition(
                "test_pipeline requires an idle session".to_string(),
            ));
        }
        self.set_stage(&mut state, SessionStage::Formatting);
        let formatted = match self.formatter.format(state.mode, SELF_TEST_TEXT).await {
            Ok(text) => text,
            Err(err) => {
                self.set_stage(&mut state, SessionStage::from_error(&err));
                return Err(err);
            }
        };
        self.set_stage(&mut state, SessionStage::Injecting);
        if let Err(err) = self.injector.inject(&formatted).await {
            self.set_stage(&mut state, SessionStage::from_error(&err));
            return Err(err);
        }
        self.set_stage(&mut state, SessionStage::Idle);
        Ok(())
    }

    // ── Hot path ─────────────────────────────────────────────────────

    /// Feed one chunk of raw PCM into the session: normally invoked by the
    /// [`Capture`] collaborator's callback, but public so a host that pulls
    /// audio itself (rather than registering a push callback) can drive
    /// the pipeline directly. Enqueues the bytes, wakes a parked ASR loop
    /// iteration, and ensures exactly one ASR loop task is running.
    pub async fn push_audio_chunk(self: Arc<Self>, bytes: Vec<u8>) {
        {
            let mut state = self.state.lock().await;
            if !state.recording {
                return;
            }
            state.queue.enqueue(&bytes);
        }
        self.audio_available.notify_one();
        self.ensure_loop_running().await;
    }

    /// Starts the ASR loop task iff one is not already running and there
    /// is something for it to do. Checking-and-setting the flag under the
    /// same lock the loop clears it under is what prevents a lost wakeup:
    /// either this call observes the loop's exit before it flips the
    /// flag (so it restarts it), or after (so the loop itself is still
    /// live to pick up the new bytes next iteration).
    async fn ensure_loop_running(self: &Arc<Self>) {
        let mut needs_spawn = false;
        {
            let mut state = self.state.lock().await;
            if !state.asr_loop_running && state.queue.pending_bytes() > 0 {
                state.asr_loop_running = true;
                needs_spawn = true;
            }
        }
        if needs_spawn {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_asr_loop().await });
        }
    }

    async fn run_asr_loop(self: Arc<Self>) {
        loop {
            let slice = {
                let mut state = self.state.lock().await;
                let recording = state.recording;
                let pending = state.queue.pending_bytes();
                match state.scheduler.select_take_bytes(pending, recording) {
                    Some(n) if n > 0 => state.queue.take(n),
                    _ => None,
                }
            };

            let Some(slice) = slice else {
                let mut state = self.state.lock().await;
                if state.queue.pending_bytes() == 0 {
                    state.asr_loop_running = false;
                    drop(state);
                    self.loop_finished.notify_waiters();
                    return;
                }
                drop(state);
                // Below the minimum window and still recording: wait for
                // more audio (or for drain to flip `recording` off) rather
                // than busy-loop.
                self.audio_available.notified().await;
                continue;
            };

            self.process_slice(slice).await;
        }
    }

    /// Run one taken slice through the gate, ASR, rewrite, dedup, and
    /// injector stages, recording a latency sample for any slice that
    /// reaches ASR. A fatal error here ends the session; a non-fatal one
    /// just drops this slice and the loop continues.
    async fn process_slice(&self, slice: crate::pcm_queue::PendingSlice) {
        let enqueued_at = slice.oldest_enqueued_at;
        let audio_ms = bytes_to_ms(slice.bytes.len());
        let pending_ms = {
            let state = self.state.lock().await;
            bytes_to_ms(state.queue.pending_bytes())
        };

        let keep = {
            let mut state = self.state.lock().await;
            state.scheduler.gate_slice(&slice.bytes, Instant::now())
        };
        if !keep {
            return;
        }

        let queue_ms = elapsed_ms(enqueued_at);
        let asr_start = Instant::now();
        let result = self
            .asr
            .push_stream(slice.bytes, crate::pcm_queue::SAMPLE_RATE_HZ as u32)
            .await;
        let asr_ms = elapsed_ms(asr_start);

        // EWMAs are updated on a failed request too, not just a successful
        // one — the scheduler still needs to track real ASR latency.
        {
            let mut state = self.state.lock().await;
            state.scheduler.record_asr_timing(asr_ms, audio_ms.max(1), pending_ms);
        }

        let text = match result {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(error = %err, "asr push_stream failed, dropping slice");
                if err.is_fatal() {
                    self.fail_session(err).await;
                }
                return;
            }
        };

        if is_no_new_text(&text) {
            return;
        }

        self.apply_new_text(&text, queue_ms, audio_ms, asr_ms, enqueued_at).await;
    }

    /// Shared by the hot path and drain's `flush_stream` tail: rewrite,
    /// dedup against the already-injected transcript, append to the
    /// buffers, inject, and record a latency sample.
    async fn apply_new_text(
        &self,
        text: &str,
        queue_ms: u32,
        audio_ms: u32,
        asr_ms: u32,
        enqueued_at: Instant,
    ) {
        let (mut rewritten, applied) = if self.config.spoken_formatting_commands {
            rewriter::rewrite(text)
        } else {
            (text.to_string(), 0)
        };
        if applied > 0 {
            tracing::debug!(applied, "spoken-punctuation rules applied");
        }

        // `rewrite` always trims trailing whitespace, but each streamed
        // chunk still needs a word boundary against whatever follows it —
        // restore a single trailing space here so §4.E's "re-append a
        // trailing space iff the original chunk ended in whitespace" rule
        // has something to preserve instead of always seeing a bare word.
        if !rewritten.is_empty() {
            rewritten.push(' ');
        }

        let deduped = {
            let state = self.state.lock().await;
            dedup::dedup(&state.live_injected, &rewritten)
        };
        if deduped.is_empty() {
            return;
        }

        {
            let mut state = self.state.lock().await;
            state.raw_parts.push_str(&deduped);
            state.live_injected.push_str(&deduped);
        }

        let inject_start = Instant::now();
        if let Err(err) = self.injector.inject(&deduped).await {
            tracing::warn!(error = %err, "injector failed");
            self.fail_session(err).await;
            return;
        }
        let inject_ms = elapsed_ms(inject_start);

        let mut state = self.state.lock().await;
        state.latency.push(LatencySample {
            queue_ms,
            audio_ms,
            asr_ms,
            inject_ms,
            end_to_end_ms: elapsed_ms(enqueued_at),
        });
    }

    async fn fail_session(&self, err: DictationError) {
        let mut state = self.state.lock().await;
        state.recording = false;
        self.set_stage(&mut state, SessionStage::from_error(&err));
    }

    // ── Drain (session stop) ──────────────────────────────────────────

    /// The eight-step stop sequence: stop capture, wait out the live
    /// queue under force-flush, pull any stateful-backend tail, normalize
    /// the accumulated transcript, optionally re-transcribe the whole
    /// buffer as a final pass, format, and inject the result.
    async fn drain(self: &Arc<Self>) -> Result<(), DictationError> {
        {
            let mut state = self.state.lock().await;
            self.set_stage(&mut state, SessionStage::Transcribing);
        }
        self.capture.stop().await?;

        self.audio_available.notify_one();
        self.ensure_loop_running().await;
        loop {
            {
                let state = self.state.lock().await;
                if !state.asr_loop_running {
                    break;
                }
            }
            self.loop_finished.notified().await;
        }

        let tail = self.asr.flush_stream().await?;
        if !is_no_new_text(&tail) {
            self.apply_new_text(&tail, 0, 0, 0, Instant::now()).await;
        }
        self.asr.stop_stream().await?;

        let mut state = self.state.lock().await;
        state.raw_parts = normalize_raw_parts(&state.raw_parts);

        if self.config.parakeet_final_pass {
            let full_audio = state.queue.full_audio().to_vec();
            drop(state);
            if !full_audio.is_empty() {
                let final_text = self
                    .asr
                    .transcribe(full_audio, crate::pcm_queue::SAMPLE_RATE_HZ as u32)
                    .await?;
                if !is_no_new_text(&final_text) {
                    let (rewritten, _) = if self.config.spoken_formatting_commands {
                        rewriter::rewrite(&final_text)
                    } else {
                        (final_text, 0)
                    };
                    let final_text = normalize_raw_parts(&rewritten);
                    let existing = {
                        let state = self.state.lock().await;
                        state.live_injected.trim().to_string()
                    };
                    self.injector.replace_recent_text(&existing, &final_text).await?;
                    let mut state = self.state.lock().await;
                    state.raw_parts = final_text.clone();
                    state.live_injected = final_text;
                }
            }
            state = self.state.lock().await;
        }

        self.set_stage(&mut state, SessionStage::Formatting);
        let raw = state.raw_parts.clone();
        let mode = state.mode;
        drop(state);

        let formatted = match self.formatter.format(mode, &raw).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "formatter failed, injecting raw transcript");
                raw.clone()
            }
        };

        if formatted != raw {
            let mut state = self.state.lock().await;
            self.set_stage(&mut state, SessionStage::Injecting);
            let existing = state.live_injected.trim().to_string();
            drop(state);
            self.injector.replace_recent_text(&existing, &formatted).await?;
        }

        self.events.emit(SessionEvent::DictationCompleted {
            raw: raw.clone(),
            formatted: formatted.clone(),
        });

        let mut state = self.state.lock().await;
        state.queue.clear();
        self.set_stage(&mut state, SessionStage::Idle);
        Ok(())
    }

    /// A completed session's latency percentile summary, for host
    /// diagnostics (§4.H). Meaningless mid-session; call after drain.
    #[must_use]
    pub async fn latency_summary(&self) -> crate::latency::LatencySummary {
        self.state.lock().await.latency.summarize()
    }

    fn set_stage(&self, state: &mut SessionState, stage: SessionStage) {
        if state.stage != stage {
            tracing::debug!(old = ?state.stage, new = ?stage, "session stage transition");
            state.stage = stage.clone();
            self.events.emit(SessionEvent::StateChanged(stage));
        }
    }
}

fn elapsed_ms(since: Instant) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    {
        since.elapsed().as_millis() as u32
    }
}

/// Normalize an accumulated transcript (§4.G step 4): drop trailing
/// horizontal whitespace before a newline, collapse 3+ newlines to 2,
/// collapse runs of spaces to one, then trim the ends. Distinct from
/// (and simpler than) [`rewriter`]'s whitespace pass, which also handles
/// bracket/quote hugging on freshly rewritten punctuation.
fn normalize_raw_parts(text: &str) -> String {
    let mut no_trailing_ws: String = String::with_capacity(text.len());
    for line in text.split('\n') {
        no_trailing_ws.push_str(line.trim_end_matches([' ', '\t']));
        no_trailing_ws.push('\n');
    }
    no_trailing_ws.pop(); // the split/join above adds one extra trailing '\n'

    let mut collapsed_newlines = String::with_capacity(no_trailing_ws.len());
    let mut newline_run = 0u32;
    for ch in no_trailing_ws.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                collapsed_newlines.push(ch);
            }
        } else {
            newline_run = 0;
            collapsed_newlines.push(ch);
        }
    }

    let mut collapsed_spaces = String::with_capacity(collapsed_newlines.len());
    let mut prev_space = false;
    for ch in collapsed_newlines.chars() {
        if ch == ' ' {
            if !prev_space {
                collapsed_spaces.push(ch);
            }
            prev_space = true;
        } else {
            prev_space = false;
            collapsed_spaces.push(ch);
        }
    }

    collapsed_spaces.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::stubs::{EchoAsrWorker, NullCapture, PassThroughFormatter, StringInjector};
    use crate::events::NoopEmitter;

    fn test_orchestrator() -> (Arc<Orchestrator>, Arc<StringInjector>) {
        let injector = Arc::new(StringInjector::default());
        let orchestrator = Arc::new(Orchestrator::new(
            PipelineConfig::default(),
            Arc::new(NullCapture),
            Arc::new(EchoAsrWorker::default()),
            Arc::new(PassThroughFormatter),
            injector.clone(),
            Box::new(NoopEmitter),
        ));
        (orchestrator, injector)
    }

    #[test]
    fn normalize_raw_parts_collapses_whitespace_and_newlines() {
        let input = "hello   world  \n\n\n\nmore   text   ";
        assert_eq!(normalize_raw_parts(input), "hello world\n\nmore text");
    }

    #[test]
    fn normalize_raw_parts_on_empty_string_is_empty() {
        assert_eq!(normalize_raw_parts(""), "");
    }

    #[tokio::test]
    async fn press_then_release_with_no_audio_completes_with_empty_transcript() {
        let (orchestrator, injector) = test_orchestrator();
        orchestrator.handle_press().await.unwrap();
        assert!(matches!(orchestrator.stage().await, SessionStage::Recording));
        orchestrator.handle_release().await.unwrap();
        assert!(matches!(orchestrator.stage().await, SessionStage::Idle));
        assert!(injector.buffer.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn press_is_a_noop_while_already_recording() {
        let (orchestrator, _injector) = test_orchestrator();
        orchestrator.handle_press().await.unwrap();
        orchestrator.handle_press().await.unwrap();
        assert!(matches!(orchestrator.stage().await, SessionStage::Recording));
    }

    #[tokio::test]
    async fn release_is_a_noop_while_idle() {
        let (orchestrator, _injector) = test_orchestrator();
        orchestrator.handle_release().await.unwrap();
        assert!(matches!(orchestrator.stage().await, SessionStage::Idle));
    }

    #[tokio::test]
    async fn audio_chunk_is_transcribed_and_injected_on_release() {
        let (orchestrator, injector) = test_orchestrator();
        orchestrator.handle_press().await.unwrap();
        // Non-silent audio; EchoAsrWorker::push_stream echoes back "word".
        Arc::clone(&orchestrator).push_audio_chunk(vec![1, 2, 3, 4]).await;
        orchestrator.handle_release().await.unwrap();
        assert!(matches!(orchestrator.stage().await, SessionStage::Idle));
        assert!(injector.buffer.lock().unwrap().contains("word"));
    }

    #[tokio::test]
    async fn test_pipeline_round_trips_through_formatter_and_injector() {
        let (orchestrator, injector) = test_orchestrator();
        orchestrator.test_pipeline().await.unwrap();
        assert_eq!(*injector.buffer.lock().unwrap(), SELF_TEST_TEXT);
        assert!(matches!(orchestrator.stage().await, SessionStage::Idle));
    }
}
