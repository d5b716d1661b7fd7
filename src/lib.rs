//! Real-time dictation pipeline core.
//!
//! Ingests streamed 16 kHz mono PCM, hands it to an external ASR worker
//! process over a framed IPC transport at an adaptively sized cadence,
//! stitches the resulting partial transcripts together, rewrites spoken
//! punctuation, and drives a formatter/injector pair to deliver finished
//! text. The orchestrator in [`session`] is the crate's single entry
//! point; everything else is a collaborator it drives or a building block
//! it's assembled from.

#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tokio_test as _;

pub mod asr;
pub mod collaborators;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod ipc;
pub mod latency;
pub mod pcm_queue;
pub mod rewriter;
pub mod scheduler;
pub mod session;

pub use asr::{AsrProxy, AsrWorker, StreamContext};
pub use collaborators::{Capture, ChunkCallback, Formatter, Injector};
pub use config::{AsrBackend, FormatMode, IpcTimeouts, PipelineConfig};
pub use error::DictationError;
pub use events::{BroadcastEmitter, NoopEmitter, SessionEvent, SessionEventEmitter, SessionStage};
pub use ipc::FramedTransport;
pub use latency::{LatencySample, LatencySummary, PercentileSummary};
pub use session::Orchestrator;
