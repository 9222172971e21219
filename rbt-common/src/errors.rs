//! Error taxonomy for Remote Build Trigger.
//!
//! The daemon collapses `Authentication` and unrecognized commands into a
//! single generic wire response so a probing client cannot tell which check
//! failed; the typed variants below exist for everything the CLI and the
//! library surface to their own callers.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the registry, protocol, and dispatch layers.
#[derive(Debug, Error)]
pub enum Error {
    /// App-level or project-level key mismatch.
    #[error("invalid key")]
    Authentication,

    /// Unknown project, remote alias, or missing file.
    #[error("unknown {kind} `{name}`")]
    NotFound { kind: &'static str, name: String },

    /// A required payload field is missing or has the wrong shape.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// A build command exited non-zero.
    #[error("{message}")]
    Execution { message: String },

    /// Connection-level failure talking to a daemon.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The daemon answered with a non-success result.
    #[error("remote rejected the request: {result}")]
    Rejected { result: String },

    /// A frame arrived but did not parse as a protocol message.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// A single frame exceeded the protocol size cap. Carries the number
    /// of bytes read before the capped read gave up.
    #[error("frame exceeds the protocol limit ({0} bytes read)")]
    FrameTooLarge(usize),

    /// Registry or response (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Build descriptor parse failure.
    #[error("invalid build descriptor: {0}")]
    Descriptor(#[from] toml::de::Error),

    /// Build descriptor render failure.
    #[error("could not render build descriptor: {0}")]
    DescriptorRender(#[from] toml::ser::Error),

    /// No per-user configuration directory on this platform.
    #[error("no user configuration directory available")]
    NoConfigDir,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connection-level failures, classified so the CLI can report
/// "server not running" for a refusal without guessing.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing is listening on the target host/port.
    #[error("connection refused")]
    Refused,

    /// The configured request timeout elapsed before a response arrived.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer closed the connection before sending a response.
    #[error("connection closed before a response arrived")]
    ClosedEarly,

    #[error("transport error: {0}")]
    Io(#[source] std::io::Error),
}

impl TransportError {
    /// Classify an I/O error from `connect`, keeping refusals distinct.
    pub fn from_connect(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            Self::Refused
        } else {
            Self::Io(err)
        }
    }

    /// True when the failure means "nothing is listening there".
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused)
    }
}

impl Error {
    /// True when this error is a transport-level refusal, i.e. the daemon
    /// is not running at all.
    pub fn is_server_not_running(&self) -> bool {
        matches!(self, Self::Transport(t) if t.is_refused())
    }
}
