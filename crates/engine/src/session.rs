use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::warn;

use chunklift_protocol::types::{SessionStatus, UploadKind, UploadMetadata};

use crate::adaptive::{AdaptiveTimeout, SpeedWindow};
use crate::config::EngineConfig;
use crate::{EngineError, store::SessionSnapshot};

/// One upload-in-progress, tracked by the engine and keyed by the
/// server-issued session token.
///
/// Progress fields split into two groups: durable fields that survive in
/// the snapshot store, and live-only fields (speed, ETA, adaptive timeout,
/// staleness clock) that are recomputed from scratch after a restart.
#[derive(Debug)]
pub struct UploadSession {
    pub token: String,
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub kind: UploadKind,
    pub metadata: UploadMetadata,
    /// Chunk size fixed at session creation; the layout never changes.
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Server-acknowledged chunk count. Monotone while non-terminal.
    pub uploaded_chunks: u32,
    pub uploaded_bytes: u64,
    pub status: SessionStatus,
    /// User-facing explanation of the current status (queue wait text,
    /// retry progress, terminal error message).
    pub status_message: String,
    pub expires_at: DateTime<Utc>,
    pub scheduled_retry_at: Option<DateTime<Utc>>,
    pub pinned: bool,
    pub order_index: u32,
    pub thumbnail_url: Option<String>,

    // Live-only state below; never serialized.
    pub timeout: AdaptiveTimeout,
    pub speed: SpeedWindow,
    pub last_progress_at: Instant,
}

impl UploadSession {
    /// Builds a session from a successful create-session exchange.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token: String,
        filename: String,
        file_size: u64,
        mime_type: String,
        kind: UploadKind,
        metadata: UploadMetadata,
        total_chunks: u32,
        expires_at: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            token,
            filename,
            file_size,
            mime_type,
            kind,
            metadata,
            chunk_size: config.chunk_size,
            total_chunks,
            uploaded_chunks: 0,
            uploaded_bytes: 0,
            status: SessionStatus::Active,
            status_message: String::new(),
            expires_at,
            scheduled_retry_at: None,
            pinned: false,
            order_index: 0,
            thumbnail_url: None,
            timeout: AdaptiveTimeout::new(
                config.default_chunk_timeout,
                config.min_chunk_timeout,
                config.max_chunk_timeout,
            ),
            speed: SpeedWindow::default(),
            last_progress_at: Instant::now(),
        }
    }

    /// Rehydrates a session from a stored snapshot. Live-only fields start
    /// fresh; a source payload must be re-attached before transfer resumes.
    pub fn from_snapshot(snap: SessionSnapshot, config: &EngineConfig) -> Self {
        Self {
            token: snap.session_token,
            filename: snap.filename,
            file_size: snap.file_size,
            mime_type: snap.mime_type,
            kind: snap.upload_kind,
            metadata: snap.metadata,
            chunk_size: snap.chunk_size,
            total_chunks: snap.total_chunks,
            uploaded_chunks: snap.uploaded_chunks,
            uploaded_bytes: snap.uploaded_bytes,
            // An interrupted active session cannot still be transferring.
            status: if snap.status == SessionStatus::Active {
                SessionStatus::Paused
            } else {
                snap.status
            },
            status_message: snap.status_message,
            expires_at: snap.expires_at,
            scheduled_retry_at: None,
            pinned: snap.pinned,
            order_index: snap.order_index,
            thumbnail_url: snap.thumbnail_url,
            timeout: AdaptiveTimeout::new(
                config.default_chunk_timeout,
                config.min_chunk_timeout,
                config.max_chunk_timeout,
            ),
            speed: SpeedWindow::default(),
            last_progress_at: Instant::now(),
        }
    }

    /// Durable projection for the snapshot store. Strictly derivable from
    /// non-transient fields; file handles and in-flight state never leak in.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_token: self.token.clone(),
            filename: self.filename.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            upload_kind: self.kind,
            metadata: self.metadata.clone(),
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            uploaded_chunks: self.uploaded_chunks,
            uploaded_bytes: self.uploaded_bytes,
            status: self.status,
            status_message: self.status_message.clone(),
            expires_at: self.expires_at,
            pinned: self.pinned,
            order_index: self.order_index,
            thumbnail_url: self.thumbnail_url.clone(),
        }
    }

    /// Upload progress as a percentage (0-100), always derived from chunk
    /// counts and never stored independently.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.uploaded_chunks as f64 / self.total_chunks as f64 * 100.0
    }

    /// Applies a server chunk acknowledgment.
    ///
    /// Server counts are authoritative but only ever raise local counts;
    /// re-acknowledging an already-counted index cannot regress progress.
    pub fn record_ack(&mut self, server_chunks: u32, server_bytes: u64, chunk_len: u64) {
        self.uploaded_chunks = self.uploaded_chunks.max(server_chunks);
        self.uploaded_bytes = self.uploaded_bytes.max(server_bytes);
        self.speed.add_sample(chunk_len);
        self.last_progress_at = Instant::now();
    }

    /// First chunk index not yet acknowledged by the server. Transfer
    /// always resumes here, never from 0.
    pub fn next_chunk_index(&self) -> u32 {
        self.uploaded_chunks
    }

    /// Time since the last acknowledged progress.
    pub fn staleness(&self) -> Duration {
        self.last_progress_at.elapsed()
    }

    /// Current transfer speed in bytes/second.
    pub fn bytes_per_second(&self) -> f64 {
        self.speed.bytes_per_second()
    }

    /// Estimated seconds remaining, if speed is known.
    pub fn eta_secs(&self) -> Option<f64> {
        self.speed
            .eta_secs(self.file_size.saturating_sub(self.uploaded_bytes))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    pub fn mark_active(&mut self) {
        self.status = SessionStatus::Active;
        self.status_message.clear();
        self.scheduled_retry_at = None;
        self.last_progress_at = Instant::now();
    }

    pub fn mark_paused(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Paused;
        self.status_message = message.into();
    }

    pub fn mark_finalizing(&mut self) {
        self.status = SessionStatus::Finalizing;
        self.status_message.clear();
        self.last_progress_at = Instant::now();
    }

    pub fn mark_completed(&mut self) {
        self.status = SessionStatus::Completed;
        self.status_message.clear();
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.status_message = message.into();
    }

    /// Validates a caller-supplied source for resume/retry.
    ///
    /// Byte length must match exactly; a differing name is tolerated with
    /// a warning because mobile file pickers rename on reselection.
    pub fn validate_source(&self, source_len: u64, source_name: &str) -> Result<(), EngineError> {
        if source_len != self.file_size {
            return Err(EngineError::FileMismatch {
                expected: self.file_size,
                supplied: source_len,
            });
        }
        if source_name != self.filename {
            warn!(
                session = %self.token,
                expected = %self.filename,
                supplied = %source_name,
                "resuming with renamed file"
            );
        }
        Ok(())
    }
}
