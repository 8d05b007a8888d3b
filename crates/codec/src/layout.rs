/// Deterministic partition of the byte range `[0, file_size)` into
/// `ceil(file_size / chunk_size)` contiguous, non-overlapping chunks
/// indexed from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkLayout {
    /// Creates a layout.
    ///
    /// If `chunk_size` is 0, [`crate::DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        let chunk_size = if chunk_size == 0 {
            crate::DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            file_size,
            chunk_size,
        }
    }

    /// Total number of chunks: `ceil(file_size / chunk_size)`.
    pub fn chunk_count(&self) -> u32 {
        self.file_size.div_ceil(self.chunk_size) as u32
    }

    /// Byte range `[start, end)` of chunk `index`, or `None` past the end.
    pub fn range(&self, index: u32) -> Option<(u64, u64)> {
        let start = index as u64 * self.chunk_size;
        if start >= self.file_size {
            return None;
        }
        let end = (start + self.chunk_size).min(self.file_size);
        Some((start, end))
    }

    /// Total payload size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Configured chunk size in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_is_ceiling() {
        assert_eq!(ChunkLayout::new(0, 4).chunk_count(), 0);
        assert_eq!(ChunkLayout::new(1, 4).chunk_count(), 1);
        assert_eq!(ChunkLayout::new(4, 4).chunk_count(), 1);
        assert_eq!(ChunkLayout::new(5, 4).chunk_count(), 2);
        assert_eq!(ChunkLayout::new(25 * 1024 * 1024, 1024 * 1024).chunk_count(), 25);
    }

    #[test]
    fn ranges_cover_payload_exactly() {
        // Exercise several payload/chunk size combinations.
        for (file_size, chunk_size) in [(10u64, 3u64), (10, 10), (10, 11), (1, 1), (100, 7)] {
            let layout = ChunkLayout::new(file_size, chunk_size);
            let mut cursor = 0u64;
            for i in 0..layout.chunk_count() {
                let (start, end) = layout.range(i).unwrap();
                assert_eq!(start, cursor, "contiguous at chunk {i}");
                assert!(end > start);
                assert!(end - start <= chunk_size);
                cursor = end;
            }
            assert_eq!(cursor, file_size, "ranges cover [0, {file_size})");
            assert!(layout.range(layout.chunk_count()).is_none());
        }
    }

    #[test]
    fn last_chunk_is_partial() {
        let layout = ChunkLayout::new(10, 4);
        assert_eq!(layout.range(2), Some((8, 10)));
    }

    #[test]
    fn zero_chunk_size_falls_back_to_default() {
        let layout = ChunkLayout::new(100, 0);
        assert_eq!(layout.chunk_size(), crate::DEFAULT_CHUNK_SIZE);
        assert_eq!(layout.chunk_count(), 1);
    }

    #[test]
    fn empty_payload_has_no_ranges() {
        let layout = ChunkLayout::new(0, 1024);
        assert_eq!(layout.chunk_count(), 0);
        assert!(layout.range(0).is_none());
    }
}
