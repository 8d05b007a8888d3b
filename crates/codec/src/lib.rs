//! Chunk codec: partitions a payload into fixed-size byte ranges, encodes
//! each range into a transport-safe base64 string, and digests the raw
//! bytes with SHA-256 for integrity verification.

mod chunk;
mod layout;
mod source;

pub use chunk::{EncodedChunk, checksum_bytes, decode_chunk, encode_chunk};
pub use layout::ChunkLayout;
pub use source::{ChunkSource, FileSource, MemorySource};

/// Default chunk size: 1 MiB.
///
/// The server may negotiate a different size at session creation; callers
/// pass the negotiated value into [`ChunkLayout`].
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the codec.
///
/// [`CodecError::Read`] is a local source-access problem (revoked handle,
/// disk error) and is retryable; it is deliberately distinct from any
/// transmit-side failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("chunk read failed: {0}")]
    Read(String),

    #[error("chunk index {0} out of range")]
    OutOfRange(u32),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("invalid chunk encoding: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}
