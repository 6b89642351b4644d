use std::fmt;

use thiserror::Error;

/// Why a single chunk was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The server answered with something other than `200 OK`.
    Status { code: u16, text: String },
    /// The request never produced a response.
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { code, text } if text.is_empty() => write!(f, "{code}"),
            Self::Status { code, text } => write!(f, "{code} {text}"),
            Self::Transport(message) => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Please select a file first!")]
    NoFileSelected,

    #[error("file {0} is empty")]
    EmptyFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid server url: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("chunk {index} upload failed: {reason}")]
    ChunkUploadFailed { index: usize, reason: FailureReason },

    #[error("upload cancelled at chunk {index}")]
    Cancelled { index: usize },
}
