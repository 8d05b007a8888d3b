use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of payload being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadKind {
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "file")]
    File,
}

/// Current state of an upload session.
///
/// `Completed` and `Expired` are terminal. `Error` is terminal unless the
/// caller explicitly retries. `Expired` is assigned by server-side policy
/// and only ever observed locally, never asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "expired")]
    Expired,
}

impl SessionStatus {
    /// Returns `true` if no further transitions are possible without
    /// explicit caller action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }

    /// Returns `true` if the session can be driven back to `Active`
    /// given a matching source payload.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::Error)
    }
}

/// Caller-supplied descriptors attached to a session at creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collection_id: String,
}

/// Identifies the uploading device to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent: String,
}

/// Server-side view of a session, as returned by the active-session
/// listing. This is the authoritative reconciliation source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub session_token: String,
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub upload_kind: UploadKind,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub uploaded_bytes: u64,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl SessionDescriptor {
    /// Upload progress as a percentage (0-100), derived from chunk counts.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.uploaded_chunks as f64 / self.total_chunks as f64 * 100.0
    }
}
