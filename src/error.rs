//! Crate-wide error type.
//!
//! One variant per failure mode in the error taxonomy: capture-start
//! failures abort session start, IPC failures are mostly non-fatal (logged
//! and the affected slice is dropped), formatter/injector failures have
//! their own fallback policy applied by the orchestrator.

/// Errors that can occur anywhere in the dictation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DictationError {
    /// The capture collaborator failed to start streaming.
    #[error("capture failed to start: {0}")]
    CaptureStart(String),

    /// The ASR child process exited unexpectedly.
    #[error("asr worker exited (code={code:?}, signal={signal:?})")]
    AsrWorkerExited {
        code: Option<i32>,
        signal: Option<i32>,
    },

    /// A single IPC request failed (timeout, write error, or protocol error).
    #[error("asr request failed: {0}")]
    AsrRequest(String),

    /// An IPC request exceeded its timeout.
    #[error("asr request timed out after {0}ms")]
    AsrTimeout(u64),

    /// A response frame exceeded the maximum JSON length or carried no id.
    #[error("ipc protocol error: {0}")]
    IpcProtocol(String),

    /// The formatter collaborator failed.
    #[error("formatter failed: {0}")]
    Formatter(String),

    /// The injector collaborator failed.
    #[error("injector failed: {0}")]
    Injector(String),

    /// Operation attempted while the session was not in a valid state for it.
    #[error("invalid session transition: {0}")]
    InvalidTransition(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying I/O error (spawning the child process, pipe I/O).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error on the IPC wire format.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A human-readable detail string, suitable for attaching to
/// `SessionState::Error { detail }`.
///
/// Localization of this string is explicitly a host-application concern;
/// the core only ever produces the `Display` output of a `DictationError`.
#[must_use]
pub fn detail_of(err: &DictationError) -> String {
    err.to_string()
}

impl DictationError {
    /// Whether this error should transition the session to `Error` (fatal,
    /// per the §7 taxonomy) as opposed to being logged and absorbed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CaptureStart(_)
                | Self::AsrWorkerExited { .. }
                | Self::Injector(_)
                | Self::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_start_is_fatal() {
        assert!(DictationError::CaptureStart("no device".into()).is_fatal());
    }

    #[test]
    fn asr_request_is_not_fatal() {
        assert!(!DictationError::AsrRequest("timeout".into()).is_fatal());
    }

    #[test]
    fn detail_of_matches_display() {
        let err = DictationError::Formatter("boom".into());
        assert_eq!(detail_of(&err), "formatter failed: boom");
    }
}
