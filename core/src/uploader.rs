//! Sequential chunked upload.
//!
//! [`ChunkUploader`] walks a [`ChunkPlan`] in index order and hands each chunk to a
//! [`ChunkTransport`]. Exactly one chunk is in flight at a time: the next chunk is not
//! even read from the source until the previous one has been answered. The first
//! failure ends the session; there is no retry and nothing is resumed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{FailureReason, UploadError},
    plan::{Chunk, ChunkPlan, CHUNK_SIZE},
    source::ChunkSource,
};

/// Everything the server needs to place one chunk.
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub index: usize,
    pub total_chunks: usize,
    pub filename: String,
    pub data: Bytes,
}

/// Result of sending a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Success,
    Failure(FailureReason),
}

/// Carries one chunk to the server.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Sends `payload` and resolves once the server has answered.
    ///
    /// `progress` is called with the number of bytes of this chunk handed to the
    /// connection so far.
    async fn send_chunk(
        &self,
        payload: ChunkPayload,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> ChunkOutcome;
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started {
        filename: String,
        size: u64,
        total_chunks: usize,
    },
    /// Percent of the current chunk transferred, `0.0..=100.0`.
    Progress { index: usize, percent: f64 },
    ChunkUploaded { index: usize, total_chunks: usize },
    Completed { filename: String, total_chunks: usize },
    Failed { index: usize, reason: FailureReason },
    Cancelled { index: usize },
}

impl UploadEvent {
    /// The line this event appends to the upload log, if any.
    pub fn log_line(&self) -> Option<String> {
        match self {
            Self::Started { .. } | Self::Progress { .. } => None,
            Self::ChunkUploaded { index, .. } => Some(format!("Chunk {index} uploaded")),
            Self::Completed { .. } => Some("Upload complete".to_string()),
            Self::Failed { reason, .. } => Some(format!("Upload error: {reason}")),
            Self::Cancelled { index } => Some(format!("Upload cancelled at chunk {index}")),
        }
    }
}

/// Receives progress and log events. Called synchronously from the upload loop.
pub trait UploadObserver: Send + Sync {
    fn on_event(&self, event: UploadEvent);
}

pub struct NoOpObserver;

impl UploadObserver for NoOpObserver {
    fn on_event(&self, _event: UploadEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Uploading { chunk: usize },
    Complete,
    Aborted { chunk: usize },
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted { .. })
    }
}

/// Transient progress of one upload attempt.
///
/// Holds `0 <= current_chunk <= total_chunks`; the session is complete exactly when
/// `current_chunk == total_chunks`.
#[derive(Debug, Clone)]
pub struct UploadSession {
    plan: ChunkPlan,
    current_chunk: usize,
    state: UploadState,
}

impl UploadSession {
    pub fn new(plan: ChunkPlan) -> Self {
        Self {
            plan,
            current_chunk: 0,
            state: UploadState::Idle,
        }
    }

    pub fn current_chunk(&self) -> usize {
        self.current_chunk
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Moves to the next chunk to send, or to `Complete` when none are left.
    pub fn begin_next(&mut self) -> Option<Chunk> {
        if self.state.is_terminal() {
            return None;
        }
        match self.plan.chunk(self.current_chunk) {
            Some(chunk) => {
                self.state = UploadState::Uploading { chunk: chunk.index };
                Some(chunk)
            }
            None => {
                self.state = UploadState::Complete;
                None
            }
        }
    }

    /// Records that the chunk in flight was accepted.
    pub fn finish_current(&mut self) {
        if let UploadState::Uploading { chunk } = self.state {
            debug_assert_eq!(chunk, self.current_chunk);
            self.current_chunk += 1;
        }
    }

    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = UploadState::Aborted {
                chunk: self.current_chunk,
            };
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub filename: String,
    pub size: u64,
    pub total_chunks: usize,
}

pub struct ChunkUploader<T> {
    transport: T,
    observer: Arc<dyn UploadObserver>,
    cancel: CancellationToken,
    chunk_size: u64,
}

impl<T: ChunkTransport> ChunkUploader<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            observer: Arc::new(NoOpObserver),
            cancel: CancellationToken::new(),
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token that aborts the upload when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn upload(
        &self,
        source: Option<&dyn ChunkSource>,
    ) -> Result<UploadSummary, UploadError> {
        let source = source.ok_or(UploadError::NoFileSelected)?;
        let filename = source.name().to_string();
        if source.size() == 0 {
            return Err(UploadError::EmptyFile(filename));
        }

        let plan = ChunkPlan::with_chunk_size(source.size(), self.chunk_size);
        let total_chunks = plan.total_chunks();
        let mut session = UploadSession::new(plan);

        tracing::info!(%filename, size = plan.size(), total_chunks, "starting chunked upload");
        self.emit(UploadEvent::Started {
            filename: filename.clone(),
            size: plan.size(),
            total_chunks,
        });
        self.emit(UploadEvent::Progress {
            index: 0,
            percent: 0.0,
        });

        while let Some(chunk) = session.begin_next() {
            let index = chunk.index;
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(&mut session, index));
            }

            let data = match source.read_chunk(&chunk).await {
                Ok(data) => data,
                Err(error) => {
                    tracing::error!(%error, index, "failed to read chunk");
                    session.abort();
                    return Err(error);
                }
            };
            let payload = ChunkPayload {
                index,
                total_chunks,
                filename: filename.clone(),
                data,
            };

            let chunk_len = chunk.len();
            let progress = |sent: u64| {
                self.emit(UploadEvent::Progress {
                    index,
                    percent: sent.min(chunk_len) as f64 / chunk_len as f64 * 100.,
                });
            };

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(&mut session, index));
                }
                outcome = self.transport.send_chunk(payload, &progress) => outcome,
            };

            match outcome {
                ChunkOutcome::Success => {
                    tracing::info!(index, total_chunks, "chunk uploaded");
                    session.finish_current();
                    self.emit(UploadEvent::ChunkUploaded {
                        index,
                        total_chunks,
                    });
                }
                ChunkOutcome::Failure(reason) => {
                    tracing::error!(%reason, index, "chunk upload failed");
                    session.abort();
                    self.emit(UploadEvent::Failed {
                        index,
                        reason: reason.clone(),
                    });
                    return Err(UploadError::ChunkUploadFailed { index, reason });
                }
            }
        }

        debug_assert_eq!(session.state(), UploadState::Complete);
        tracing::info!(%filename, total_chunks, "upload complete");
        self.emit(UploadEvent::Progress {
            index: total_chunks - 1,
            percent: 100.,
        });
        self.emit(UploadEvent::Completed {
            filename: filename.clone(),
            total_chunks,
        });

        Ok(UploadSummary {
            filename,
            size: plan.size(),
            total_chunks,
        })
    }

    fn cancelled(&self, session: &mut UploadSession, index: usize) -> UploadError {
        tracing::warn!(index, "upload cancelled");
        session.abort();
        self.emit(UploadEvent::Cancelled { index });
        UploadError::Cancelled { index }
    }

    fn emit(&self, event: UploadEvent) {
        self.observer.on_event(event);
    }
}
