use serde::{Deserialize, Serialize};

pub const UPLOAD_CHUNK_PATH: &str = "/upload_chunk";
pub const UPLOAD_PATH: &str = "/upload";

pub const FIELD_FILE: &str = "file";
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
pub const FIELD_TOTAL_CHUNKS: &str = "totalChunks";
pub const FIELD_FILENAME: &str = "filenameWithExtension";

/// Part filename browsers give to a sliced `Blob`.
pub const CHUNK_PART_FILENAME: &str = "blob";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadResp {
    pub status: String,
    pub file: String,
    pub timestamp: String,
}
