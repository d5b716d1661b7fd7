//! §4.B — framed IPC transport.
//!
//! Carries length-prefixed JSON requests (with an optional binary tail) to
//! a long-lived child process and correlates responses by request id.

mod transport;

pub use transport::{FramedTransport, MAX_JSON_LEN};
