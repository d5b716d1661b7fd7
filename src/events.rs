//! Session event subscription surface (§4.G, §9 supplement).
//!
//! Grounded in the teacher's `AppEventEmitter` port
//! (`gglib-core/src/ports/event_emitter.rs`): a trait object the
//! orchestrator holds and emits into without blocking, a `NoopEmitter` for
//! tests, and — since the spec calls for a runtime that must never let a
//! slow subscriber back-pressure the orchestrator — a `broadcast`-backed
//! implementation whose `send` is synchronous and simply drops lagging
//! receivers' oldest messages rather than waiting on them.

use crate::config::FormatMode;
use crate::error::DictationError;

/// A snapshot of the orchestrator's state machine, copied out for
/// observers (§4.G). Mutated only by the orchestrator; observers never see
/// a live reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStage {
    Idle,
    Recording,
    Transcribing,
    Formatting,
    Injecting,
    Error { detail: String },
}

impl SessionStage {
    #[must_use]
    pub fn from_error(err: &DictationError) -> Self {
        Self::Error {
            detail: crate::error::detail_of(err),
        }
    }
}

/// The three events the orchestrator publishes (§4.G step 8, §9).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionStage),
    ModeChanged(FormatMode),
    DictationCompleted { raw: String, formatted: String },
}

/// A non-blocking sink for [`SessionEvent`]s. Implementations must not
/// block or await inside `emit`.
pub trait SessionEventEmitter: Send + Sync {
    fn emit(&self, event: SessionEvent);

    fn clone_box(&self) -> Box<dyn SessionEventEmitter>;
}

/// Discards every event. Default for tests and hosts with no listener.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl SessionEventEmitter for NoopEmitter {
    fn emit(&self, _event: SessionEvent) {}

    fn clone_box(&self) -> Box<dyn SessionEventEmitter> {
        Box::new(self.clone())
    }
}

/// Publishes onto a [`tokio::sync::broadcast`] channel. `send` never
/// blocks: a subscriber that falls behind silently loses its oldest
/// buffered events on its next `recv`, rather than ever slowing the
/// orchestrator down.
#[derive(Clone)]
pub struct BroadcastEmitter {
    sender: tokio::sync::broadcast::Sender<SessionEvent>,
}

impl BroadcastEmitter {
    /// `capacity` bounds how many events a lagging subscriber can fall
    /// behind by before its oldest ones are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl SessionEventEmitter for BroadcastEmitter {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error; the event is simply unheard.
        let _ = self.sender.send(event);
    }

    fn clone_box(&self) -> Box<dyn SessionEventEmitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_emitter_discards_without_panicking() {
        let emitter = NoopEmitter;
        emitter.emit(SessionEvent::StateChanged(SessionStage::Idle));
        let _boxed: Box<dyn SessionEventEmitter> = emitter.clone_box();
    }

    #[tokio::test]
    async fn broadcast_emitter_delivers_to_subscriber() {
        let emitter = BroadcastEmitter::new(8);
        let mut rx = emitter.subscribe();
        emitter.emit(SessionEvent::DictationCompleted {
            raw: "hi".into(),
            formatted: "Hi.".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::DictationCompleted { raw, .. } if raw == "hi"));
    }

    #[test]
    fn broadcast_emitter_with_no_subscribers_does_not_error() {
        let emitter = BroadcastEmitter::new(4);
        emitter.emit(SessionEvent::StateChanged(SessionStage::Recording));
    }
}
