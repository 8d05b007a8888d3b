//! Remote procedure contract the engine consumes.
//!
//! The server side is owned by an external collaborator; the engine only
//! sees this trait. Using a trait keeps transfer logic decoupled from the
//! actual wire (HTTP, WebSocket) and testable with mocks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use chunklift_protocol::messages::{
    CreateSessionRequest, CreateSessionResponse, FinalizeResponse, FinalizeStatusResponse,
    ListSessionsResponse, SaveThumbnailRequest, SaveThumbnailResponse, UploadChunkRequest,
    UploadChunkResponse,
};

/// Errors from transport calls.
///
/// `Timeout` is distinct from `Network` so the adaptive controller can
/// tell a slow link from a broken one. `Cancelled` is never retried.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("call exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Returns `true` if another attempt may succeed.
    ///
    /// Server rejections include checksum mismatches, which are treated
    /// as transmit failures and retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_) | Self::Rejected(_))
    }
}

/// Boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Abstract client for the upload session contract.
pub trait TransportClient: Send + Sync {
    /// Creates a new upload session.
    fn create_session(&self, req: CreateSessionRequest) -> TransportFuture<'_, CreateSessionResponse>;

    /// Uploads one encoded chunk.
    fn upload_chunk(&self, req: UploadChunkRequest) -> TransportFuture<'_, UploadChunkResponse>;

    /// Signals that all chunks have been sent.
    fn finalize(&self, session_token: &str) -> TransportFuture<'_, FinalizeResponse>;

    /// Polls server-side assembly state during an asynchronous finalize.
    fn finalize_status(&self, session_token: &str) -> TransportFuture<'_, FinalizeStatusResponse>;

    /// Tells the server the session is paused.
    fn pause_session(&self, session_token: &str) -> TransportFuture<'_, ()>;

    /// Tells the server to discard the session.
    fn cancel_session(&self, session_token: &str) -> TransportFuture<'_, ()>;

    /// Lists the caller's active sessions (authoritative for reconcile).
    fn list_sessions(&self) -> TransportFuture<'_, ListSessionsResponse>;

    /// Attaches a thumbnail to a session.
    fn save_thumbnail(&self, req: SaveThumbnailRequest) -> TransportFuture<'_, SaveThumbnailResponse>;
}

/// Races a transport call against its deadline and the session's
/// cancellation token.
///
/// Cancellation wins over both other arms and surfaces as
/// [`TransportError::Cancelled`], which callers must not retry.
pub async fn call_with_deadline<T>(
    fut: TransportFuture<'_, T>,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<T, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = fut => result,
        _ = tokio::time::sleep(deadline) => Err(TransportError::Timeout(deadline)),
    }
}
