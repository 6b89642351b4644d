/// Size of every chunk except possibly the last one (5 MiB).
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// A contiguous byte range `[start, end)` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// How a file of `size` bytes is partitioned into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u64,
    total_chunks: usize,
}

impl ChunkPlan {
    pub fn new(size: u64) -> Self {
        Self::with_chunk_size(size, CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        let total_chunks = size.div_ceil(chunk_size) as usize;
        Self {
            size,
            chunk_size,
            total_chunks,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        let end = (start + self.chunk_size).min(self.size);
        Some(Chunk { index, start, end })
    }

    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.total_chunks).filter_map(|index| self.chunk(index))
    }
}
