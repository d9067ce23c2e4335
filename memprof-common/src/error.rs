//! The error taxonomy from spec §7. These are *internal* diagnostics: per
//! the propagation policy, no error crosses from the Registry (or the
//! broker) to the instrumented program or to a client's session. Callers
//! use these for logging and for tests, not for `?`-propagation to users.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfilerError {
    /// An event was lost due to reentrancy or failed internal bookkeeping.
    /// Never constructed on the instrumented path itself — the reentrancy
    /// guard in `memprof-runtime` must drop silently, without even
    /// formatting this variant, since doing so would itself allocate.
    /// Kept for the taxonomy spec §7 documents and for out-of-band tests.
    #[error("event dropped during recording: {0}")]
    RecordingDropped(String),

    /// A TCP write or connect failed; the sender will retry on its next
    /// tick.
    #[error("transport error (will retry): {0}")]
    TransportTransient(String),

    /// An inbound line was not parseable as a known command or event.
    #[error("malformed protocol line: {0}")]
    ProtocolMalformed(String),

    /// A broker command referenced a topic or subscription that does not
    /// exist.
    #[error("unknown topic or not subscribed: {0}")]
    UnknownTopic(String),
}
