//! Resumable chunked upload engine.
//!
//! One long-lived [`UploadEngine`] instance owns every upload session in
//! the process: it creates sessions against a remote [`TransportClient`],
//! drives chunk transfer with adaptive timeouts and bounded concurrency,
//! queues sessions behind a global active-upload cap, persists resumable
//! state to a local snapshot store, and reconciles against the server's
//! authoritative session listing.

mod adaptive;
mod config;
mod driver;
mod engine;
mod notify;
mod retry;
mod scheduler;
mod session;
mod store;
mod transport;

pub use adaptive::{AdaptiveTimeout, NetworkMonitor, NetworkQuality, SpeedWindow};
pub use config::EngineConfig;
pub use engine::{EngineCounts, UploadEngine};
pub use notify::{EngineCallbacks, LogNotifier, Notifier, UploadEvent};
pub use retry::RetryPolicy;
pub use scheduler::WaitQueue;
pub use session::UploadSession;
pub use store::{SessionSnapshot, SnapshotStore, StoreError, merge_server_state};
pub use transport::{TransportClient, TransportError, call_with_deadline};

/// Capabilities negotiated once at engine startup and consulted by later
/// logic instead of ad hoc per-call probing.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Chunk checksums are computed and sent.
    pub integrity_check: bool,
    /// OS-level notifications may be delivered.
    pub notifications: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            integrity_check: true,
            notifications: false,
        }
    }
}

/// Errors surfaced by the engine's caller-facing methods.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("file mismatch: expected {expected} bytes, supplied {supplied}")]
    FileMismatch { expected: u64, supplied: u64 },

    #[error("session {token} is not in a resumable state")]
    NotResumable { token: String },

    #[error("session {token} cannot be paused from its current state")]
    NotPausable { token: String },

    #[error("no file available for session {0}")]
    FileUnavailable(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] chunklift_codec::CodecError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}
