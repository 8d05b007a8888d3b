use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use crate::{ChunkLayout, ChunkSource, CodecError};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// One chunk in transport form: base64 payload plus a digest of the raw
/// bytes. An empty checksum means integrity verification was disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Chunk index within the layout.
    pub index: u32,
    /// Byte offset of the range start.
    pub offset: u64,
    /// Raw (pre-encoding) length in bytes.
    pub len: usize,
    /// Base64-encoded chunk bytes.
    pub data: String,
    /// Hex SHA-256 of the raw bytes.
    pub checksum: String,
}

/// Reads chunk `index` from `source` and encodes it for transport.
///
/// `with_checksum` is the negotiated integrity capability; when false the
/// checksum field is left empty instead of failing per call.
pub async fn encode_chunk(
    source: &dyn ChunkSource,
    layout: ChunkLayout,
    index: u32,
    with_checksum: bool,
) -> Result<EncodedChunk, CodecError> {
    let (start, end) = layout.range(index).ok_or(CodecError::OutOfRange(index))?;
    let raw = source.read_range(start, end).await?;

    let expected = (end - start) as usize;
    if raw.len() != expected {
        return Err(CodecError::ShortRead {
            expected,
            actual: raw.len(),
        });
    }

    let checksum = if with_checksum {
        checksum_bytes(&raw)
    } else {
        String::new()
    };

    Ok(EncodedChunk {
        index,
        offset: start,
        len: raw.len(),
        data: STANDARD.encode(&raw),
        checksum,
    })
}

/// Decodes a transport chunk back to raw bytes, verifying the digest when
/// one is present.
pub fn decode_chunk(chunk: &EncodedChunk) -> Result<Vec<u8>, CodecError> {
    let raw = STANDARD.decode(&chunk.data)?;
    if !chunk.checksum.is_empty() && checksum_bytes(&raw) != chunk.checksum {
        return Err(CodecError::ChecksumMismatch);
    }
    Ok(raw)
}
