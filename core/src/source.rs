use std::{
    io::SeekFrom,
    path::Path,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::Mutex,
};

use crate::{error::UploadError, plan::Chunk};

/// Binary data of known size with a file name, sliced one chunk at a time.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// File name including extension.
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    async fn read_chunk(&self, chunk: &Chunk) -> Result<Bytes, UploadError>;
}

/// A file on the local filesystem.
pub struct LocalFile {
    name: String,
    size: u64,
    file: Mutex<File>,
}

impl LocalFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self {
            name,
            size,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl ChunkSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_chunk(&self, chunk: &Chunk) -> Result<Bytes, UploadError> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(chunk.start)).await?;
        let mut buf = vec![0u8; chunk.len() as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf.into())
    }
}

/// An in-memory buffer posing as a named file.
pub struct MemorySource {
    name: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_chunk(&self, chunk: &Chunk) -> Result<Bytes, UploadError> {
        let end = chunk.end as usize;
        if end > self.data.len() {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "chunk extends past end of buffer",
            )));
        }
        Ok(self.data.slice(chunk.start as usize..end))
    }
}
