//! Per-session transfer loop.
//!
//! Drives chunk batches from the first unacknowledged index, retries each
//! chunk with backoff up to the configured budget (fail-fast per batch),
//! then finalizes — polling for asynchronous server-side assembly when
//! needed. Every suspension point checks the session's cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chunklift_codec::{ChunkLayout, ChunkSource, encode_chunk};
use chunklift_protocol::messages::{AssemblyState, UploadChunkRequest};

use crate::engine::EngineShared;
use crate::notify::UploadEvent;
use crate::transport::{TransportError, call_with_deadline};

enum ChunkError {
    Cancelled,
    Failed { index: u32, message: String },
}

enum AttemptError {
    Cancelled,
    Retryable(String),
    Fatal(String),
}

enum PollOutcome {
    Completed(Option<String>),
    Failed(String),
    Cancelled,
}

/// Runs the transfer for one session until it completes, fails, or is
/// cancelled (pause and cancel both fire the token; the initiator owns
/// the resulting state change).
pub(crate) async fn drive_session(
    shared: Arc<EngineShared>,
    token: String,
    cancel: CancellationToken,
) {
    let source = shared.source_of(&token);
    let Some(source) = source else {
        warn!(session = %token, "no source attached, leaving session paused");
        shared.update_session(&token, |s| s.mark_paused("file not available"));
        shared.persist().await;
        shared.finish_transfer(&token);
        return;
    };

    let Some((layout, total_chunks)) = shared.with_session(&token, |s| {
        (ChunkLayout::new(s.file_size, s.chunk_size), s.total_chunks)
    }) else {
        shared.finish_transfer(&token);
        return;
    };

    info!(session = %token, chunks = total_chunks, "transfer started");
    shared.emit(UploadEvent::Started {
        token: token.clone(),
    });

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let Some(next) = shared.with_session(&token, |s| s.next_chunk_index()) else {
            shared.finish_transfer(&token);
            return;
        };
        if next >= total_chunks {
            break;
        }

        // Batch size follows current network quality, not just config.
        let effective = shared
            .monitor
            .effective_concurrency(shared.chunk_concurrency());
        let batch_end = (next + effective as u32).min(total_chunks);

        // The first chunk to exhaust its budget aborts the whole batch:
        // siblings are cancelled through a batch-scoped token instead of
        // running their own ladders to the end.
        let batch_cancel = cancel.child_token();
        let mut attempts: FuturesUnordered<_> = (next..batch_end)
            .map(|index| {
                upload_chunk_with_retry(
                    &shared,
                    &token,
                    source.as_ref(),
                    layout,
                    index,
                    &batch_cancel,
                )
            })
            .collect();

        let mut failed: Option<(u32, String)> = None;
        while let Some(result) = attempts.next().await {
            match result {
                Ok(()) => {}
                Err(ChunkError::Cancelled) => {}
                Err(ChunkError::Failed { index, message }) => {
                    if failed.is_none() {
                        failed = Some((index, message));
                        batch_cancel.cancel();
                    }
                }
            }
        }
        drop(attempts);

        if cancel.is_cancelled() {
            return;
        }
        if let Some((index, message)) = failed {
            // 1-indexed in user-facing messages.
            let message = format!("chunk {} of {} failed: {}", index + 1, total_chunks, message);
            error!(session = %token, %message, "transfer failed");
            shared.update_session(&token, |s| s.mark_error(message.clone()));
            shared.persist().await;
            shared.emit(UploadEvent::Failed {
                token: token.clone(),
                message,
            });
            shared.finish_transfer(&token);
            return;
        }

        let progress = shared.with_session(&token, |s| UploadEvent::Progress {
            token: s.token.clone(),
            uploaded_chunks: s.uploaded_chunks,
            total_chunks: s.total_chunks,
            bytes_per_sec: s.bytes_per_second(),
            eta_secs: s.eta_secs(),
        });
        shared.persist().await;
        if let Some(event) = progress {
            shared.emit(event);
        }
    }

    finalize_session(&shared, &token, &cancel).await;
}

/// Attempts one chunk up to the configured budget with backoff between
/// attempts. Cancellation aborts immediately and is never retried.
async fn upload_chunk_with_retry(
    shared: &Arc<EngineShared>,
    token: &str,
    source: &dyn ChunkSource,
    layout: ChunkLayout,
    index: u32,
    cancel: &CancellationToken,
) -> Result<(), ChunkError> {
    let max_attempts = shared.config.max_chunk_attempts;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(ChunkError::Cancelled);
        }

        match attempt_chunk(shared, token, source, layout, index, cancel).await {
            Ok(()) => return Ok(()),
            Err(AttemptError::Cancelled) => return Err(ChunkError::Cancelled),
            Err(AttemptError::Fatal(message)) => {
                return Err(ChunkError::Failed { index, message });
            }
            Err(AttemptError::Retryable(message)) => {
                debug!(
                    session = %token,
                    chunk = index,
                    attempt,
                    error = %message,
                    "chunk attempt failed"
                );
                last_error = message;
            }
        }

        if attempt == max_attempts {
            break;
        }

        shared.emit(UploadEvent::Retrying {
            token: token.to_string(),
            chunk_index: index,
            attempt,
            max_attempts,
        });

        let delay = shared.config.retry.delay_for_attempt(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ChunkError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Err(ChunkError::Failed {
        index,
        message: format!("gave up after {max_attempts} attempts: {last_error}"),
    })
}

/// One read-encode-transmit attempt.
///
/// A source read failure is retryable but deliberately not fed into the
/// network monitor — the link is not at fault.
async fn attempt_chunk(
    shared: &Arc<EngineShared>,
    token: &str,
    source: &dyn ChunkSource,
    layout: ChunkLayout,
    index: u32,
    cancel: &CancellationToken,
) -> Result<(), AttemptError> {
    let chunk =
        match encode_chunk(source, layout, index, shared.capabilities.integrity_check).await {
            Ok(chunk) => chunk,
            Err(e) => return Err(AttemptError::Retryable(e.to_string())),
        };

    let deadline = shared.chunk_deadline(token);
    let req = UploadChunkRequest {
        session_token: token.to_string(),
        chunk_index: index,
        chunk_data: chunk.data,
        checksum: chunk.checksum,
    };

    let started = Instant::now();
    match call_with_deadline(shared.transport.upload_chunk(req), deadline, cancel).await {
        Ok(resp) => {
            if resp.checksum_verified == Some(false) {
                // Integrity failure counts as a transmit failure.
                shared.monitor.record(0.0, false);
                shared.update_session(token, |s| s.timeout.record_failure());
                return Err(AttemptError::Retryable(
                    "server reported checksum mismatch".into(),
                ));
            }

            let elapsed = started.elapsed().as_secs_f64().max(1e-6);
            shared.monitor.record(chunk.len as f64 / elapsed, true);
            shared.update_session(token, |s| {
                s.timeout.record_success();
                s.record_ack(resp.uploaded_chunks, resp.uploaded_bytes, chunk.len as u64);
            });

            throttle(shared, chunk.len, started, cancel).await?;
            Ok(())
        }
        Err(TransportError::Cancelled) => Err(AttemptError::Cancelled),
        Err(e) if e.is_retryable() => {
            shared.monitor.record(0.0, false);
            shared.update_session(token, |s| s.timeout.record_failure());
            Err(AttemptError::Retryable(e.to_string()))
        }
        Err(e) => Err(AttemptError::Fatal(e.to_string())),
    }
}

/// Enforces the global speed limit by stretching each chunk to its
/// minimum duration. No-op when the limit is 0 (unlimited).
async fn throttle(
    shared: &Arc<EngineShared>,
    chunk_len: usize,
    started: Instant,
    cancel: &CancellationToken,
) -> Result<(), AttemptError> {
    let limit = shared.speed_limit();
    if limit == 0 {
        return Ok(());
    }
    let min_secs = chunk_len as f64 / limit as f64;
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed >= min_secs {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(AttemptError::Cancelled),
        _ = tokio::time::sleep(Duration::from_secs_f64(min_secs - elapsed)) => Ok(()),
    }
}

/// Finalize phase: mark finalizing, request assembly, poll when the
/// server defers it. Finalize failure is terminal — it is never retried
/// here.
async fn finalize_session(shared: &Arc<EngineShared>, token: &str, cancel: &CancellationToken) {
    shared.update_session(token, |s| s.mark_finalizing());
    shared.persist().await;
    shared.emit(UploadEvent::Finalizing {
        token: token.to_string(),
    });

    let result = call_with_deadline(
        shared.transport.finalize(token),
        shared.config.control_timeout,
        cancel,
    )
    .await;

    match result {
        Err(TransportError::Cancelled) => {}
        Err(e) => fail_finalize(shared, token, format!("finalize failed: {e}")).await,
        Ok(resp) if !resp.success => {
            let detail = if resp.message.is_empty() {
                "server rejected finalize".to_string()
            } else {
                resp.message
            };
            fail_finalize(shared, token, format!("finalize failed: {detail}")).await;
        }
        Ok(resp) if resp.async_assembly => match poll_assembly(shared, token, cancel).await {
            PollOutcome::Completed(url) => complete_session(shared, token, url).await,
            PollOutcome::Failed(message) => fail_finalize(shared, token, message).await,
            PollOutcome::Cancelled => {}
        },
        Ok(resp) => complete_session(shared, token, resp.url).await,
    }
}

/// Polls assembly state at a fixed interval until terminal or the poll
/// budget runs out.
async fn poll_assembly(
    shared: &Arc<EngineShared>,
    token: &str,
    cancel: &CancellationToken,
) -> PollOutcome {
    let started = Instant::now();
    let budget = shared.config.finalize_poll_budget;

    loop {
        if started.elapsed() >= budget {
            return PollOutcome::Failed(format!(
                "assembly did not finish within {} minutes",
                budget.as_secs() / 60
            ));
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(shared.config.finalize_poll_interval) => {}
        }

        match call_with_deadline(
            shared.transport.finalize_status(token),
            shared.config.control_timeout,
            cancel,
        )
        .await
        {
            Err(TransportError::Cancelled) => return PollOutcome::Cancelled,
            Err(e) => {
                // Transient poll failures just wait for the next tick.
                warn!(session = %token, error = %e, "finalize status poll failed");
            }
            Ok(status) => match status.status {
                AssemblyState::Completed => return PollOutcome::Completed(status.url),
                AssemblyState::Failed => {
                    let message = if status.message.is_empty() {
                        "server-side assembly failed".to_string()
                    } else {
                        status.message
                    };
                    return PollOutcome::Failed(message);
                }
                AssemblyState::Finalizing => {}
            },
        }
    }
}

async fn complete_session(shared: &Arc<EngineShared>, token: &str, url: Option<String>) {
    info!(session = %token, "upload completed");
    shared.update_session(token, |s| s.mark_completed());
    shared.remove_session(token);
    shared.persist().await;
    shared.emit(UploadEvent::Completed {
        token: token.to_string(),
        url,
    });
    shared.finish_transfer(token);
}

async fn fail_finalize(shared: &Arc<EngineShared>, token: &str, message: String) {
    error!(session = %token, %message, "finalize failed");
    shared.update_session(token, |s| s.mark_error(message.clone()));
    shared.persist().await;
    shared.emit(UploadEvent::Failed {
        token: token.to_string(),
        message,
    });
    shared.finish_transfer(token);
}
