use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::CodecError;

/// A readable upload payload.
///
/// Abstracts over where the bytes live (memory, disk). The engine holds a
/// `ChunkSource` per session; losing it (process restart) is exactly the
/// case where resumption needs the caller to re-attach a matching source.
pub trait ChunkSource: Send + Sync {
    /// Total payload length in bytes.
    fn len(&self) -> u64;

    /// Returns `true` if the payload is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display name of the payload (file name for disk sources).
    fn name(&self) -> &str;

    /// Reads exactly the byte range `[start, end)`.
    ///
    /// Any failure surfaces as [`CodecError::Read`].
    fn read_range(
        &self,
        start: u64,
        end: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, CodecError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// In-memory payload (recorded media buffers, small files).
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl ChunkSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_range(
        &self,
        start: u64,
        end: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, CodecError>> + Send + '_>> {
        Box::pin(async move {
            if end > self.data.len() as u64 || start > end {
                return Err(CodecError::Read(format!(
                    "range {start}..{end} outside payload of {} bytes",
                    self.data.len()
                )));
            }
            Ok(self.data[start as usize..end as usize].to_vec())
        })
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// Disk-backed payload, read with positioned tokio file I/O.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    len: u64,
}

impl FileSource {
    /// Opens `path` and records its current length.
    pub async fn open(path: &Path) -> Result<Self, CodecError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| CodecError::Read(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            len: meta.len(),
        })
    }
}

impl ChunkSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_range(
        &self,
        start: u64,
        end: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, CodecError>> + Send + '_>> {
        Box::pin(async move {
            if end > self.len || start > end {
                return Err(CodecError::Read(format!(
                    "range {start}..{end} outside file of {} bytes",
                    self.len
                )));
            }
            let mut file = tokio::fs::File::open(&self.path)
                .await
                .map_err(|e| CodecError::Read(e.to_string()))?;
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| CodecError::Read(e.to_string()))?;
            let mut buf = vec![0u8; (end - start) as usize];
            file.read_exact(&mut buf)
                .await
                .map_err(|e| CodecError::Read(e.to_string()))?;
            Ok(buf)
        })
    }
}
