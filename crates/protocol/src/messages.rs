use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceInfo, SessionDescriptor, UploadKind, UploadMetadata};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub upload_kind: UploadKind,
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<UploadMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

/// Sends one chunk of upload data.
///
/// `chunk_data` is the base64 transport encoding produced by the chunk
/// codec and travels opaque; the checksum is a hex SHA-256 digest of the
/// raw (pre-encoding) bytes. An empty checksum means the client
/// negotiated no integrity verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub session_token: String,
    pub chunk_index: u32,
    pub chunk_data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Signals that all chunks have been sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub session_token: String,
}

/// Attaches a thumbnail image to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveThumbnailRequest {
    pub session_token: String,
    #[serde(with = "base64_bytes")]
    pub thumbnail: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledges session creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_token: String,
    pub total_chunks: u32,
    pub expires_at: DateTime<Utc>,
}

/// Acknowledges a chunk. `uploaded_chunks` is authoritative and monotone;
/// re-sending an already-acknowledged index does not change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub uploaded_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_verified: Option<bool>,
}

/// Result of a finalize call.
///
/// For large payloads the server defers assembly to a background job and
/// sets `async_assembly`; the client then polls [`FinalizeStatusResponse`]
/// until a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub async_assembly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Server-side assembly state, polled during asynchronous finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssemblyState {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "failed")]
    Failed,
}

/// Response to a finalize-status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeStatusResponse {
    pub status: AssemblyState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Acknowledges a saved thumbnail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveThumbnailResponse {
    pub thumbnail_url: String,
}

/// Authoritative listing of the caller's active sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionDescriptor>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Serde helper: `Vec<u8>` as a base64 string.
///
/// Keeps chunk bytes binary-safe inside JSON payloads.
pub mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
