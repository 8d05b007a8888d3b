//! Durable snapshot store and server reconciliation.
//!
//! Sessions in visible non-terminal states are mirrored to a JSON file on
//! every meaningful state change so an interrupted process can rehydrate
//! instantly, before any server contact. The server's active-session
//! listing then supersedes the snapshot under the merge rules in
//! [`merge_server_state`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chunklift_protocol::types::{SessionDescriptor, SessionStatus, UploadKind, UploadMetadata};

use crate::config::EngineConfig;
use crate::session::UploadSession;

/// Errors from the snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable projection of one session.
///
/// Strictly derivable from non-transient fields: no file handles, no
/// abort tokens, no live speed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_token: String,
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub upload_kind: UploadKind,
    #[serde(default)]
    pub metadata: UploadMetadata,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub uploaded_bytes: u64,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_message: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
    #[serde(default)]
    pub order_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// JSON-file snapshot store with atomic replace.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Loads the stored snapshots. A missing file is an empty store.
    pub async fn load(&self) -> Result<Vec<SessionSnapshot>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let snapshots: Vec<SessionSnapshot> = serde_json::from_slice(&bytes)?;
                debug!(count = snapshots.len(), "loaded session snapshots");
                Ok(snapshots)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the given snapshots, replacing the previous file atomically
    /// (write to a temp sibling, then rename).
    pub async fn save(&self, snapshots: &[SessionSnapshot]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(snapshots)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Merges the server's authoritative session listing into the local set.
///
/// Rules, in precedence order:
/// - tokens in `cleared` (locally cancelled, deletion not yet confirmed
///   server-side) are dropped from the server view entirely;
/// - a local `error` session is preserved verbatim — server data must not
///   silently clear a user-visible error;
/// - a local `active` session keeps its live fields and takes the server's
///   chunk/byte counts only as a floor (progress never regresses);
/// - otherwise server data wins; any locally-held source handle is kept by
///   the caller (handles live outside the session map);
/// - server sessions unknown locally are added, with `active` mapped to
///   `paused` since no local transfer is running for them.
pub fn merge_server_state(
    local: &mut HashMap<String, UploadSession>,
    server: Vec<SessionDescriptor>,
    cleared: &HashSet<String>,
    config: &EngineConfig,
) {
    for desc in server {
        if cleared.contains(&desc.session_token) {
            debug!(session = %desc.session_token, "ignoring cleared session from server listing");
            continue;
        }

        match local.get_mut(&desc.session_token) {
            Some(session) if session.status == SessionStatus::Error => {
                // Preserved verbatim.
            }
            Some(session) if session.status == SessionStatus::Active => {
                session.uploaded_chunks = session.uploaded_chunks.max(desc.uploaded_chunks);
                session.uploaded_bytes = session.uploaded_bytes.max(desc.uploaded_bytes);
                session.expires_at = desc.expires_at;
                if session.thumbnail_url.is_none() {
                    session.thumbnail_url = desc.thumbnail_url;
                }
            }
            Some(session) => {
                session.uploaded_chunks = desc.uploaded_chunks;
                session.uploaded_bytes = desc.uploaded_bytes;
                session.status = desc.status;
                session.expires_at = desc.expires_at;
                if desc.thumbnail_url.is_some() {
                    session.thumbnail_url = desc.thumbnail_url;
                }
                if desc.status == SessionStatus::Expired {
                    warn!(session = %session.token, "session expired server-side");
                }
            }
            None => {
                let mut session = UploadSession::new(
                    desc.session_token.clone(),
                    desc.filename,
                    desc.file_size,
                    desc.mime_type,
                    desc.upload_kind,
                    UploadMetadata::default(),
                    desc.total_chunks,
                    desc.expires_at,
                    config,
                );
                session.chunk_size = if desc.total_chunks > 0 {
                    desc.file_size.div_ceil(desc.total_chunks as u64)
                } else {
                    config.chunk_size
                };
                session.uploaded_chunks = desc.uploaded_chunks;
                session.uploaded_bytes = desc.uploaded_bytes;
                session.status = if desc.status == SessionStatus::Active {
                    SessionStatus::Paused
                } else {
                    desc.status
                };
                session.thumbnail_url = desc.thumbnail_url;
                debug!(session = %session.token, "adopted session from server listing");
                local.insert(desc.session_token, session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot(token: &str) -> SessionSnapshot {
        SessionSnapshot {
            session_token: token.into(),
            filename: "clip.webm".into(),
            file_size: 1024,
            mime_type: "video/webm".into(),
            upload_kind: UploadKind::Video,
            metadata: UploadMetadata::default(),
            chunk_size: 256,
            total_chunks: 4,
            uploaded_chunks: 2,
            uploaded_bytes: 512,
            status: SessionStatus::Paused,
            status_message: String::new(),
            expires_at: Utc::now(),
            pinned: false,
            order_index: 0,
            thumbnail_url: None,
        }
    }

    fn descriptor(token: &str, uploaded: u32, status: SessionStatus) -> SessionDescriptor {
        SessionDescriptor {
            session_token: token.into(),
            filename: "clip.webm".into(),
            file_size: 25 * 1024 * 1024,
            mime_type: "video/webm".into(),
            upload_kind: UploadKind::Video,
            total_chunks: 25,
            uploaded_chunks: uploaded,
            uploaded_bytes: uploaded as u64 * 1024 * 1024,
            status,
            expires_at: Utc::now(),
            thumbnail_url: None,
        }
    }

    fn local_session(token: &str, uploaded: u32, status: SessionStatus) -> UploadSession {
        let mut s = UploadSession::new(
            token.into(),
            "clip.webm".into(),
            25 * 1024 * 1024,
            "video/webm".into(),
            UploadKind::Video,
            UploadMetadata::default(),
            25,
            Utc::now(),
            &EngineConfig::default(),
        );
        s.uploaded_chunks = uploaded;
        s.uploaded_bytes = uploaded as u64 * 1024 * 1024;
        s.status = status;
        s
    }

    #[tokio::test]
    async fn store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(&dir.path().join("sessions.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(&dir.path().join("sessions.json"));

        let snaps = vec![sample_snapshot("t1"), sample_snapshot("t2")];
        store.save(&snaps).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, snaps);
    }

    #[tokio::test]
    async fn store_save_replaces_previous(){
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(&dir.path().join("sessions.json"));

        store.save(&[sample_snapshot("t1")]).await.unwrap();
        store.save(&[sample_snapshot("t2")]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].session_token, "t2");
    }

    #[tokio::test]
    async fn store_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(&dir.path().join("nested/deeper/sessions.json"));
        store.save(&[sample_snapshot("t1")]).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[test]
    fn merge_preserves_local_error_verbatim() {
        let config = EngineConfig::default();
        let mut local = HashMap::new();
        let mut s = local_session("t1", 5, SessionStatus::Error);
        s.status_message = "chunk 6 of 25 failed after 10 attempts".into();
        local.insert("t1".to_string(), s);

        merge_server_state(
            &mut local,
            vec![descriptor("t1", 10, SessionStatus::Active)],
            &HashSet::new(),
            &config,
        );

        let s = &local["t1"];
        assert_eq!(s.status, SessionStatus::Error);
        assert_eq!(s.uploaded_chunks, 5);
        assert!(s.status_message.contains("chunk 6"));
    }

    #[test]
    fn merge_active_never_regresses_progress() {
        let config = EngineConfig::default();
        let mut local = HashMap::new();
        local.insert(
            "t1".to_string(),
            local_session("t1", 15, SessionStatus::Active),
        );

        merge_server_state(
            &mut local,
            vec![descriptor("t1", 12, SessionStatus::Active)],
            &HashSet::new(),
            &config,
        );

        assert_eq!(local["t1"].uploaded_chunks, 15);
    }

    #[test]
    fn merge_active_takes_higher_server_count() {
        let config = EngineConfig::default();
        let mut local = HashMap::new();
        local.insert(
            "t1".to_string(),
            local_session("t1", 8, SessionStatus::Active),
        );

        merge_server_state(
            &mut local,
            vec![descriptor("t1", 12, SessionStatus::Active)],
            &HashSet::new(),
            &config,
        );

        assert_eq!(local["t1"].uploaded_chunks, 12);
    }

    #[test]
    fn merge_paused_takes_server_data() {
        let config = EngineConfig::default();
        let mut local = HashMap::new();
        local.insert(
            "t1".to_string(),
            local_session("t1", 5, SessionStatus::Paused),
        );

        merge_server_state(
            &mut local,
            vec![descriptor("t1", 9, SessionStatus::Paused)],
            &HashSet::new(),
            &config,
        );

        assert_eq!(local["t1"].uploaded_chunks, 9);
    }

    #[test]
    fn merge_filters_cleared_sessions() {
        let config = EngineConfig::default();
        let mut local = HashMap::new();
        let mut cleared = HashSet::new();
        cleared.insert("t1".to_string());

        merge_server_state(
            &mut local,
            vec![descriptor("t1", 3, SessionStatus::Active)],
            &cleared,
            &config,
        );

        // A cancelled session must never be resurrected by a refresh.
        assert!(local.is_empty());
    }

    #[test]
    fn merge_adopts_unknown_server_session_as_paused() {
        let config = EngineConfig::default();
        let mut local = HashMap::new();

        merge_server_state(
            &mut local,
            vec![descriptor("t9", 4, SessionStatus::Active)],
            &HashSet::new(),
            &config,
        );

        let s = &local["t9"];
        // No local transfer is running for it, so it cannot be active.
        assert_eq!(s.status, SessionStatus::Paused);
        assert_eq!(s.uploaded_chunks, 4);
        assert_eq!(s.total_chunks, 25);
    }
}
