//! Engine facade and shared runtime state.
//!
//! [`UploadEngine`] is the single caller-facing handle: it owns the
//! session map, the source registry, the wait queue, the snapshot store
//! and the background watchdog. Transfer tasks spawned per session share
//! all of that through [`EngineShared`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chunklift_codec::{ChunkLayout, ChunkSource};
use chunklift_protocol::messages::{CreateSessionRequest, SaveThumbnailRequest};
use chunklift_protocol::types::{DeviceInfo, SessionStatus, UploadKind, UploadMetadata};

use crate::adaptive::{NetworkMonitor, NetworkQuality};
use crate::config::EngineConfig;
use crate::driver;
use crate::notify::{EngineCallbacks, LogNotifier, Notifier, UploadEvent};
use crate::scheduler::WaitQueue;
use crate::session::UploadSession;
use crate::store::{SessionSnapshot, SnapshotStore, merge_server_state};
use crate::transport::{TransportClient, call_with_deadline};
use crate::{Capabilities, EngineError};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const QUEUE_WAIT_MESSAGE: &str = "waiting for other uploads to finish";

// ---------------------------------------------------------------------------
// EngineShared
// ---------------------------------------------------------------------------

/// State shared between the facade and the spawned transfer tasks.
///
/// Locking rules: plain `std` locks, never held across an await; where two
/// locks nest, the order is queue, then transferring, then sessions, then
/// cancels.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) capabilities: Capabilities,
    pub(crate) transport: Arc<dyn TransportClient>,
    pub(crate) store: SnapshotStore,
    pub(crate) sessions: RwLock<HashMap<String, UploadSession>>,
    /// Source payloads live outside the session map; snapshots must never
    /// capture them and reconciliation must never drop them.
    pub(crate) sources: RwLock<HashMap<String, Arc<dyn ChunkSource>>>,
    pub(crate) cancels: Mutex<HashMap<String, CancellationToken>>,
    pub(crate) transferring: Mutex<HashSet<String>>,
    pub(crate) queue: Mutex<WaitQueue>,
    /// Locally-cancelled tokens whose deletion the server has not yet
    /// confirmed; server listings are filtered against this set.
    pub(crate) cleared: Mutex<HashSet<String>>,
    pub(crate) monitor: NetworkMonitor,
    pub(crate) events_tx: mpsc::Sender<UploadEvent>,
    pub(crate) callbacks: Mutex<EngineCallbacks>,
    pub(crate) notifier: Box<dyn Notifier>,
    pub(crate) root_cancel: CancellationToken,
    session_cap: AtomicUsize,
    chunk_concurrency: AtomicUsize,
    speed_limit: AtomicU64,
}

impl EngineShared {
    pub(crate) fn with_session<R>(
        &self,
        token: &str,
        f: impl FnOnce(&UploadSession) -> R,
    ) -> Option<R> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(token).map(f)
    }

    /// Mutates a session in place. Returns `false` if the token is unknown.
    pub(crate) fn update_session(&self, token: &str, f: impl FnOnce(&mut UploadSession)) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(token) {
            Some(s) => {
                f(s);
                true
            }
            None => false,
        }
    }

    pub(crate) fn source_of(&self, token: &str) -> Option<Arc<dyn ChunkSource>> {
        self.sources.read().unwrap().get(token).cloned()
    }

    pub(crate) fn remove_session(&self, token: &str) {
        self.sessions.write().unwrap().remove(token);
        self.sources.write().unwrap().remove(token);
    }

    /// Current per-chunk deadline for the session's adaptive timeout.
    pub(crate) fn chunk_deadline(&self, token: &str) -> Duration {
        self.with_session(token, |s| s.timeout.current())
            .unwrap_or(self.config.default_chunk_timeout)
    }

    pub(crate) fn session_cap(&self) -> usize {
        self.session_cap.load(Ordering::Relaxed)
    }

    pub(crate) fn chunk_concurrency(&self) -> usize {
        self.chunk_concurrency.load(Ordering::Relaxed)
    }

    /// Global throughput ceiling in bytes/second; 0 means unlimited.
    pub(crate) fn speed_limit(&self) -> u64 {
        self.speed_limit.load(Ordering::Relaxed)
    }

    /// Spawns (or replaces) the transfer task for a session.
    pub(crate) fn spawn_drive(self: &Arc<Self>, token: &str) {
        let cancel = self.root_cancel.child_token();
        self.cancels
            .lock()
            .unwrap()
            .insert(token.to_string(), cancel.clone());
        tokio::spawn(driver::drive_session(
            Arc::clone(self),
            token.to_string(),
            cancel,
        ));
    }

    /// Releases a session's transfer slot and admits the next queued one.
    pub(crate) fn finish_transfer(self: &Arc<Self>, token: &str) {
        self.transferring.lock().unwrap().remove(token);
        self.cancels.lock().unwrap().remove(token);
        self.pump_queue();
    }

    /// Starts the session immediately if a transfer slot is free, otherwise
    /// parks it in the wait queue. Returns `true` when it started.
    pub(crate) fn activate_or_queue(self: &Arc<Self>, token: &str, pinned: bool) -> bool {
        let activated = {
            let mut queue = self.queue.lock().unwrap();
            let mut transferring = self.transferring.lock().unwrap();
            if transferring.len() < self.session_cap() {
                transferring.insert(token.to_string());
                true
            } else {
                queue.enqueue(token, pinned);
                false
            }
        };
        if activated {
            self.update_session(token, |s| s.mark_active());
            self.spawn_drive(token);
        } else {
            self.update_session(token, |s| s.mark_paused(QUEUE_WAIT_MESSAGE));
        }
        activated
    }

    /// Fills free transfer slots from the head of the wait queue.
    pub(crate) fn pump_queue(self: &Arc<Self>) {
        loop {
            let token = {
                let mut queue = self.queue.lock().unwrap();
                let mut transferring = self.transferring.lock().unwrap();
                if transferring.len() >= self.session_cap() {
                    return;
                }
                let Some(token) = queue.pop_next() else {
                    return;
                };
                transferring.insert(token.clone());
                token
            };
            if !self.update_session(&token, |s| s.mark_active()) {
                // Cancelled while queued.
                self.transferring.lock().unwrap().remove(&token);
                continue;
            }
            self.spawn_drive(&token);
        }
    }

    /// Restarts any transferring session that has made no acknowledged
    /// progress for `threshold`. A stall is not an error: chunk counts are
    /// kept and the transfer resumes from the first unacknowledged index.
    pub(crate) fn check_stalls(self: &Arc<Self>, threshold: Duration) {
        let stalled: Vec<String> = {
            let transferring = self.transferring.lock().unwrap();
            let sessions = self.sessions.read().unwrap();
            transferring
                .iter()
                .filter(|t| {
                    sessions.get(*t).is_some_and(|s| {
                        s.status == SessionStatus::Active && s.staleness() >= threshold
                    })
                })
                .cloned()
                .collect()
        };
        for token in stalled {
            if self.restart_stalled(&token, threshold) {
                warn!(session = %token, "transfer stalled, restarting");
                self.emit(UploadEvent::Stalled {
                    token: token.clone(),
                });
            }
        }
    }

    /// Swaps in a fresh drive task for `token` if it is still a stalled
    /// active transfer. The check runs under the locks: a pause or cancel
    /// that landed after the caller's snapshot wins and the session is
    /// left untouched.
    pub(crate) fn restart_stalled(self: &Arc<Self>, token: &str, threshold: Duration) -> bool {
        let fresh = {
            let transferring = self.transferring.lock().unwrap();
            if !transferring.contains(token) {
                return false;
            }
            let mut sessions = self.sessions.write().unwrap();
            let Some(session) = sessions.get_mut(token) else {
                return false;
            };
            if session.status != SessionStatus::Active || session.staleness() < threshold {
                return false;
            }
            session.mark_active();
            let mut cancels = self.cancels.lock().unwrap();
            if let Some(old) = cancels.remove(token) {
                old.cancel();
            }
            // The replacement token is registered before the locks drop so
            // a pause or cancel arriving next reaches the new task.
            let fresh = self.root_cancel.child_token();
            cancels.insert(token.to_string(), fresh.clone());
            fresh
        };
        tokio::spawn(driver::drive_session(
            Arc::clone(self),
            token.to_string(),
            fresh,
        ));
        true
    }

    /// Rewrites each queued session's order index from its queue position.
    pub(crate) fn refresh_queue_order(&self) {
        let tokens = self.queue.lock().unwrap().tokens();
        let mut sessions = self.sessions.write().unwrap();
        for (idx, token) in tokens.iter().enumerate() {
            if let Some(s) = sessions.get_mut(token) {
                s.order_index = idx as u32;
            }
        }
    }

    /// Mirrors resumable sessions to the snapshot store. Persistence
    /// failures are logged, never propagated — losing a snapshot must not
    /// fail an upload.
    pub(crate) async fn persist(&self) {
        let snapshots = {
            let sessions = self.sessions.read().unwrap();
            let mut snaps: Vec<SessionSnapshot> = sessions
                .values()
                .filter(|s| !s.status.is_terminal())
                .map(|s| s.snapshot())
                .collect();
            snaps.sort_by(|a, b| {
                a.order_index
                    .cmp(&b.order_index)
                    .then_with(|| a.session_token.cmp(&b.session_token))
            });
            snaps
        };
        if let Err(e) = self.store.save(&snapshots).await {
            warn!(error = %e, "failed to persist session snapshots");
        }
    }

    /// Publishes an event: registered callbacks first, then the event
    /// stream. A full stream drops the event rather than blocking transfer.
    pub(crate) fn emit(&self, event: UploadEvent) {
        self.dispatch(&event);
        if self.events_tx.try_send(event).is_err() {
            debug!("event channel full, dropping event");
        }
    }

    fn dispatch(&self, event: &UploadEvent) {
        let callbacks = self.callbacks.lock().unwrap();
        match event {
            UploadEvent::Progress {
                token,
                uploaded_chunks,
                total_chunks,
                ..
            } => {
                if let Some(cb) = &callbacks.on_progress {
                    cb(token, *uploaded_chunks, *total_chunks);
                }
            }
            UploadEvent::Completed { token, url } => {
                if let Some(cb) = &callbacks.on_completed {
                    cb(token, url.as_deref().unwrap_or(""));
                }
                if self.capabilities.notifications {
                    self.notifier.notify("Upload complete", token);
                }
            }
            UploadEvent::Failed { token, message } => {
                if let Some(cb) = &callbacks.on_failed {
                    cb(token, message);
                }
                if self.capabilities.notifications {
                    self.notifier.notify("Upload failed", message);
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// UploadEngine
// ---------------------------------------------------------------------------

/// Session counts by visible state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounts {
    pub active: usize,
    pub queued: usize,
    pub paused: usize,
    pub error: usize,
}

/// Long-lived upload engine.
///
/// Must be created inside a tokio runtime; construction spawns the stall
/// watchdog. Dropping the engine cancels every background task.
pub struct UploadEngine {
    shared: Arc<EngineShared>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadEngine {
    /// Creates an engine with the default log-only notifier. OS-level
    /// notifications stay disabled.
    pub fn new(
        transport: Arc<dyn TransportClient>,
        store_path: &Path,
        config: EngineConfig,
    ) -> Self {
        Self::build(
            transport,
            store_path,
            config,
            Box::new(LogNotifier),
            Capabilities::default(),
        )
    }

    /// Creates an engine that delivers completion/failure notifications
    /// through `notifier`.
    pub fn with_notifier(
        transport: Arc<dyn TransportClient>,
        store_path: &Path,
        config: EngineConfig,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let capabilities = Capabilities {
            notifications: true,
            ..Capabilities::default()
        };
        Self::build(transport, store_path, config, notifier, capabilities)
    }

    fn build(
        transport: Arc<dyn TransportClient>,
        store_path: &Path,
        config: EngineConfig,
        notifier: Box<dyn Notifier>,
        capabilities: Capabilities,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(EngineShared {
            session_cap: AtomicUsize::new(config.session_cap.max(1)),
            chunk_concurrency: AtomicUsize::new(config.clamped_chunk_concurrency()),
            speed_limit: AtomicU64::new(0),
            config,
            capabilities,
            transport,
            store: SnapshotStore::new(store_path),
            sessions: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            transferring: Mutex::new(HashSet::new()),
            queue: Mutex::new(WaitQueue::new()),
            cleared: Mutex::new(HashSet::new()),
            monitor: NetworkMonitor::new(),
            events_tx,
            callbacks: Mutex::new(EngineCallbacks::default()),
            notifier,
            root_cancel: CancellationToken::new(),
        });
        spawn_watchdog(&shared);
        Self {
            shared,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event stream. Can be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Replaces the registered callback set wholesale.
    pub fn configure(&self, callbacks: EngineCallbacks) {
        *self.shared.callbacks.lock().unwrap() = callbacks;
    }

    /// Rehydrates sessions from the snapshot store. Already-known tokens
    /// are skipped. Returns how many sessions were added.
    pub async fn load_persisted(&self) -> Result<usize, EngineError> {
        let snapshots = self.shared.store.load().await?;
        let mut sessions = self.shared.sessions.write().unwrap();
        let mut added = 0;
        for snap in snapshots {
            if sessions.contains_key(&snap.session_token) {
                continue;
            }
            let session = UploadSession::from_snapshot(snap, &self.shared.config);
            sessions.insert(session.token.clone(), session);
            added += 1;
        }
        info!(count = added, "rehydrated sessions from snapshot store");
        Ok(added)
    }

    /// Creates a session on the server and starts (or queues) the transfer.
    /// Returns the server-issued session token.
    pub async fn start_upload(
        &self,
        source: Arc<dyn ChunkSource>,
        kind: UploadKind,
        mime_type: impl Into<String>,
        metadata: UploadMetadata,
    ) -> Result<String, EngineError> {
        let shared = &self.shared;
        let mime_type = mime_type.into();
        let layout = ChunkLayout::new(source.len(), shared.config.chunk_size);

        let req = CreateSessionRequest {
            filename: source.name().to_string(),
            file_size: source.len(),
            mime_type: mime_type.clone(),
            upload_kind: kind,
            chunk_size: shared.config.chunk_size,
            metadata: (metadata != UploadMetadata::default()).then(|| metadata.clone()),
            device_info: Some(device_info()),
        };
        let resp = call_with_deadline(
            shared.transport.create_session(req),
            shared.config.control_timeout,
            &shared.root_cancel,
        )
        .await?;

        if resp.total_chunks != layout.chunk_count() {
            warn!(
                server = resp.total_chunks,
                local = layout.chunk_count(),
                "server chunk count differs from local layout"
            );
        }

        let token = resp.session_token;
        let session = UploadSession::new(
            token.clone(),
            source.name().to_string(),
            source.len(),
            mime_type,
            kind,
            metadata,
            resp.total_chunks,
            resp.expires_at,
            &shared.config,
        );
        shared
            .sessions
            .write()
            .unwrap()
            .insert(token.clone(), session);
        shared
            .sources
            .write()
            .unwrap()
            .insert(token.clone(), source);

        if !shared.activate_or_queue(&token, false) {
            info!(session = %token, "upload queued behind active session cap");
            shared.emit(UploadEvent::Queued {
                token: token.clone(),
                message: QUEUE_WAIT_MESSAGE.into(),
            });
        }
        shared.persist().await;
        Ok(token)
    }

    /// Pauses a transfer. Chunk counts are kept; resume continues from the
    /// first unacknowledged chunk. The server is told best-effort.
    pub async fn pause(&self, token: &str) -> Result<(), EngineError> {
        let shared = &self.shared;
        let status = shared
            .with_session(token, |s| s.status)
            .ok_or_else(|| EngineError::SessionNotFound(token.to_string()))?;
        if !matches!(status, SessionStatus::Active | SessionStatus::Paused) {
            return Err(EngineError::NotPausable {
                token: token.to_string(),
            });
        }

        if let Some(cancel) = shared.cancels.lock().unwrap().remove(token) {
            cancel.cancel();
        }
        shared.queue.lock().unwrap().remove(token);
        shared.transferring.lock().unwrap().remove(token);
        shared.update_session(token, |s| s.mark_paused("paused by user"));
        shared.persist().await;
        shared.emit(UploadEvent::Paused {
            token: token.to_string(),
        });

        if let Err(e) = call_with_deadline(
            shared.transport.pause_session(token),
            shared.config.control_timeout,
            &shared.root_cancel,
        )
        .await
        {
            // Local state is authoritative for resume either way.
            warn!(session = %token, error = %e, "server pause failed");
        }
        shared.pump_queue();
        Ok(())
    }

    /// Resumes a paused session. `source` must be supplied if the engine no
    /// longer holds one (after a process restart) and must match the
    /// session's recorded byte length.
    pub async fn resume(
        &self,
        token: &str,
        source: Option<Arc<dyn ChunkSource>>,
    ) -> Result<(), EngineError> {
        self.reactivate(token, source, SessionStatus::Paused).await
    }

    /// Retries a failed session from its last acknowledged chunk.
    pub async fn retry(
        &self,
        token: &str,
        source: Option<Arc<dyn ChunkSource>>,
    ) -> Result<(), EngineError> {
        self.reactivate(token, source, SessionStatus::Error).await
    }

    async fn reactivate(
        &self,
        token: &str,
        source: Option<Arc<dyn ChunkSource>>,
        required: SessionStatus,
    ) -> Result<(), EngineError> {
        let shared = &self.shared;
        let (status, pinned) = shared
            .with_session(token, |s| (s.status, s.pinned))
            .ok_or_else(|| EngineError::SessionNotFound(token.to_string()))?;
        if status != required {
            return Err(EngineError::NotResumable {
                token: token.to_string(),
            });
        }

        if let Some(source) = source {
            shared
                .with_session(token, |s| s.validate_source(source.len(), source.name()))
                .transpose()?;
            shared
                .sources
                .write()
                .unwrap()
                .insert(token.to_string(), source);
        } else if shared.source_of(token).is_none() {
            return Err(EngineError::FileUnavailable(token.to_string()));
        }

        if shared.activate_or_queue(token, pinned) {
            shared.emit(UploadEvent::Resumed {
                token: token.to_string(),
            });
        } else {
            shared.emit(UploadEvent::Queued {
                token: token.to_string(),
                message: QUEUE_WAIT_MESSAGE.into(),
            });
        }
        shared.persist().await;
        Ok(())
    }

    /// Cancels a session and forgets it locally. The token goes on the
    /// cleared list so a server listing cannot resurrect it before the
    /// server confirms the deletion.
    pub async fn cancel(&self, token: &str) -> Result<(), EngineError> {
        let shared = &self.shared;
        if shared.with_session(token, |_| ()).is_none() {
            return Err(EngineError::SessionNotFound(token.to_string()));
        }

        if let Some(cancel) = shared.cancels.lock().unwrap().remove(token) {
            cancel.cancel();
        }
        shared.queue.lock().unwrap().remove(token);
        shared.transferring.lock().unwrap().remove(token);
        shared.cleared.lock().unwrap().insert(token.to_string());
        shared.remove_session(token);
        shared.persist().await;
        shared.emit(UploadEvent::Cancelled {
            token: token.to_string(),
        });

        if let Err(e) = call_with_deadline(
            shared.transport.cancel_session(token),
            shared.config.control_timeout,
            &shared.root_cancel,
        )
        .await
        {
            warn!(session = %token, error = %e, "server cancel failed, cleared marker kept");
        }
        shared.pump_queue();
        Ok(())
    }

    /// Schedules an automatic retry of a failed session after `delay`.
    /// A pause, cancel or manual retry in the meantime supersedes it.
    pub fn schedule_retry(&self, token: &str, delay: Duration) -> Result<(), EngineError> {
        let shared = &self.shared;
        let status = shared
            .with_session(token, |s| s.status)
            .ok_or_else(|| EngineError::SessionNotFound(token.to_string()))?;
        if status != SessionStatus::Error {
            return Err(EngineError::NotResumable {
                token: token.to_string(),
            });
        }

        let when = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        shared.update_session(token, |s| s.scheduled_retry_at = Some(when));

        let shared = Arc::clone(&self.shared);
        let token = token.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = shared.root_cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let due = shared
                .with_session(&token, |s| {
                    s.status == SessionStatus::Error && s.scheduled_retry_at.is_some()
                })
                .unwrap_or(false);
            if !due {
                debug!(session = %token, "scheduled retry superseded");
                return;
            }
            shared.update_session(&token, |s| s.scheduled_retry_at = None);

            if shared.source_of(&token).is_none() {
                shared.emit(UploadEvent::Failed {
                    token: token.clone(),
                    message: "scheduled retry failed: file not available".into(),
                });
                return;
            }
            let pinned = shared.with_session(&token, |s| s.pinned).unwrap_or(false);
            if shared.activate_or_queue(&token, pinned) {
                shared.emit(UploadEvent::Resumed {
                    token: token.clone(),
                });
            } else {
                shared.emit(UploadEvent::Queued {
                    token: token.clone(),
                    message: QUEUE_WAIT_MESSAGE.into(),
                });
            }
            shared.persist().await;
        });
        Ok(())
    }

    /// Promotes a queued session ahead of unpinned ones.
    pub async fn pin(&self, token: &str) -> Result<(), EngineError> {
        self.set_pin(token, true).await
    }

    /// Demotes a pinned session back to normal priority.
    pub async fn unpin(&self, token: &str) -> Result<(), EngineError> {
        self.set_pin(token, false).await
    }

    async fn set_pin(&self, token: &str, pinned: bool) -> Result<(), EngineError> {
        let shared = &self.shared;
        if !shared.update_session(token, |s| s.pinned = pinned) {
            return Err(EngineError::SessionNotFound(token.to_string()));
        }
        {
            let mut queue = shared.queue.lock().unwrap();
            if pinned {
                queue.pin(token);
            } else {
                queue.unpin(token);
            }
        }
        shared.refresh_queue_order();
        shared.persist().await;
        Ok(())
    }

    /// Moves a queued session to `new_index` (clamped to queue bounds).
    pub async fn reorder(&self, token: &str, new_index: usize) -> Result<(), EngineError> {
        let shared = &self.shared;
        if shared.with_session(token, |_| ()).is_none() {
            return Err(EngineError::SessionNotFound(token.to_string()));
        }
        shared.queue.lock().unwrap().reorder(token, new_index);
        shared.refresh_queue_order();
        shared.persist().await;
        Ok(())
    }

    /// Raises or lowers the concurrent-session cap; raising it admits
    /// queued sessions immediately.
    pub fn set_session_cap(&self, cap: usize) {
        self.shared.session_cap.store(cap.max(1), Ordering::Relaxed);
        self.shared.pump_queue();
    }

    /// Sets configured chunk concurrency (clamped to 1-3). Takes effect on
    /// the next batch.
    pub fn set_chunk_concurrency(&self, concurrency: usize) {
        self.shared
            .chunk_concurrency
            .store(concurrency.clamp(1, 3), Ordering::Relaxed);
    }

    /// Sets the global upload speed limit in bytes/second; 0 removes it.
    pub fn set_speed_limit(&self, bytes_per_sec: u64) {
        self.shared.speed_limit.store(bytes_per_sec, Ordering::Relaxed);
    }

    /// Snapshot of one session, if known.
    pub fn session(&self, token: &str) -> Option<SessionSnapshot> {
        self.shared.with_session(token, |s| s.snapshot())
    }

    /// Snapshots of all known sessions, queue order first.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut snaps: Vec<SessionSnapshot> = self
            .shared
            .sessions
            .read()
            .unwrap()
            .values()
            .map(|s| s.snapshot())
            .collect();
        snaps.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.session_token.cmp(&b.session_token))
        });
        snaps
    }

    /// Session counts by visible state.
    pub fn counts(&self) -> EngineCounts {
        let queued: HashSet<String> = self
            .shared
            .queue
            .lock()
            .unwrap()
            .tokens()
            .into_iter()
            .collect();
        let sessions = self.shared.sessions.read().unwrap();
        let mut counts = EngineCounts::default();
        for s in sessions.values() {
            match s.status {
                SessionStatus::Active | SessionStatus::Finalizing => counts.active += 1,
                SessionStatus::Paused if queued.contains(&s.token) => counts.queued += 1,
                SessionStatus::Paused => counts.paused += 1,
                SessionStatus::Error => counts.error += 1,
                _ => {}
            }
        }
        counts
    }

    /// Aggregate progress across all known sessions (0-100), derived from
    /// chunk counts.
    pub fn overall_progress(&self) -> f64 {
        let sessions = self.shared.sessions.read().unwrap();
        let (done, total) = sessions.values().fold((0u64, 0u64), |(d, t), s| {
            (d + s.uploaded_chunks as u64, t + s.total_chunks as u64)
        });
        if total == 0 {
            0.0
        } else {
            done as f64 / total as f64 * 100.0
        }
    }

    /// Current network quality classification.
    pub fn network_quality(&self) -> NetworkQuality {
        self.shared.monitor.quality()
    }

    /// Signals that the app returned to the foreground; transfers stale
    /// beyond the (shorter) visibility threshold are restarted at once
    /// instead of waiting for the periodic watchdog.
    pub fn visibility_regained(&self) {
        self.shared
            .check_stalls(self.shared.config.visibility_stale_after);
    }

    /// Reconciles local state against the server's authoritative session
    /// listing. Returns the number of sessions the server reported.
    pub async fn reconcile(&self) -> Result<usize, EngineError> {
        let shared = &self.shared;
        let resp = call_with_deadline(
            shared.transport.list_sessions(),
            shared.config.control_timeout,
            &shared.root_cancel,
        )
        .await?;

        let reported: HashSet<String> = resp
            .sessions
            .iter()
            .map(|d| d.session_token.clone())
            .collect();
        {
            // Once the server stops reporting a cancelled session its
            // cleared marker has done its job.
            let mut cleared = shared.cleared.lock().unwrap();
            cleared.retain(|t| reported.contains(t));
        }

        let count = resp.sessions.len();
        {
            let cleared = shared.cleared.lock().unwrap().clone();
            let mut sessions = shared.sessions.write().unwrap();
            merge_server_state(&mut sessions, resp.sessions, &cleared, &shared.config);
        }
        shared.persist().await;
        Ok(count)
    }

    /// Uploads a thumbnail for a session and records the returned URL.
    pub async fn save_thumbnail(
        &self,
        token: &str,
        thumbnail: Vec<u8>,
    ) -> Result<String, EngineError> {
        let shared = &self.shared;
        if shared.with_session(token, |_| ()).is_none() {
            return Err(EngineError::SessionNotFound(token.to_string()));
        }
        let req = SaveThumbnailRequest {
            session_token: token.to_string(),
            thumbnail,
        };
        let resp = call_with_deadline(
            shared.transport.save_thumbnail(req),
            shared.config.control_timeout,
            &shared.root_cancel,
        )
        .await?;
        shared.update_session(token, |s| s.thumbnail_url = Some(resp.thumbnail_url.clone()));
        shared.persist().await;
        Ok(resp.thumbnail_url)
    }

    /// Cancels every background task. Sessions keep their persisted state.
    pub fn shutdown(&self) {
        self.shared.root_cancel.cancel();
    }
}

impl Drop for UploadEngine {
    fn drop(&mut self) {
        self.shared.root_cancel.cancel();
    }
}

/// Periodic stall watchdog, stopped by the root cancellation token.
fn spawn_watchdog(shared: &Arc<EngineShared>) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.watchdog_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shared.root_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    shared.check_stalls(shared.config.watchdog_stale_after);
                }
            }
        }
    });
}

fn device_info() -> DeviceInfo {
    DeviceInfo {
        platform: std::env::consts::OS.to_string(),
        agent: format!("chunklift/{}", env!("CARGO_PKG_VERSION")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
