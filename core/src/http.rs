use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use reqwest::{
    multipart::{Form, Part},
    Body, Client, StatusCode,
};
use tokio::sync::mpsc;
use url::Url;

use crate::{
    error::{FailureReason, UploadError},
    types::{
        CHUNK_PART_FILENAME, FIELD_CHUNK_INDEX, FIELD_FILE, FIELD_FILENAME, FIELD_TOTAL_CHUNKS,
        UPLOAD_CHUNK_PATH,
    },
    uploader::{ChunkOutcome, ChunkPayload, ChunkTransport},
};

/// Granularity of upload progress reports.
const PROGRESS_SLICE: usize = 64 * 1024;

/// Posts chunks as `multipart/form-data` to `<server>/upload_chunk`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(client: Client, server: &Url) -> Result<Self, UploadError> {
        let endpoint = server.join(UPLOAD_CHUNK_PATH)?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Splits `data` into slices and reports the running byte count as each slice is
/// pulled by the connection.
fn progress_body(data: Bytes, sent_tx: mpsc::UnboundedSender<u64>) -> Body {
    let len = data.len();
    let slices = (0..len)
        .step_by(PROGRESS_SLICE)
        .map(move |start| data.slice(start..(start + PROGRESS_SLICE).min(len)));
    let mut sent = 0u64;
    let body = stream::iter(slices).map(move |slice| {
        sent += slice.len() as u64;
        // receiver is gone once the response arrived; nothing left to report
        let _ = sent_tx.send(sent);
        Ok::<_, std::io::Error>(slice)
    });
    Body::wrap_stream(body)
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn send_chunk(
        &self,
        payload: ChunkPayload,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> ChunkOutcome {
        let ChunkPayload {
            index,
            total_chunks,
            filename,
            data,
        } = payload;

        let total = data.len() as u64;
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let part = match Part::stream_with_length(progress_body(data, sent_tx), total)
            .file_name(CHUNK_PART_FILENAME)
            .mime_str("application/octet-stream")
        {
            Ok(part) => part,
            Err(error) => {
                return ChunkOutcome::Failure(FailureReason::Transport(error.to_string()));
            }
        };
        let form = Form::new()
            .part(FIELD_FILE, part)
            .text(FIELD_CHUNK_INDEX, index.to_string())
            .text(FIELD_TOTAL_CHUNKS, total_chunks.to_string())
            .text(FIELD_FILENAME, filename);

        tracing::debug!(endpoint = %self.endpoint, index, bytes = total, "sending chunk");
        let request = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send();
        tokio::pin!(request);

        let response = loop {
            tokio::select! {
                response = &mut request => break response,
                Some(sent) = sent_rx.recv() => progress(sent),
            }
        };
        while let Ok(sent) = sent_rx.try_recv() {
            progress(sent);
        }

        match response {
            Ok(resp) if resp.status() == StatusCode::OK => ChunkOutcome::Success,
            Ok(resp) => {
                let status = resp.status();
                ChunkOutcome::Failure(FailureReason::Status {
                    code: status.as_u16(),
                    text: status.canonical_reason().unwrap_or_default().to_string(),
                })
            }
            Err(error) => ChunkOutcome::Failure(FailureReason::Transport(error.to_string())),
        }
    }
}
