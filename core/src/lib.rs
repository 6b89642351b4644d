pub mod error;
pub mod http;
pub mod plan;
pub mod source;
pub mod types;
pub mod uploader;

pub use error::{FailureReason, UploadError};
pub use http::HttpTransport;
pub use plan::{Chunk, ChunkPlan, CHUNK_SIZE};
pub use source::{ChunkSource, LocalFile, MemorySource};
pub use uploader::{
    ChunkOutcome, ChunkPayload, ChunkTransport, ChunkUploader, NoOpObserver, UploadEvent,
    UploadObserver, UploadSession, UploadState, UploadSummary,
};
