use axum::{
    body::Bytes,
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use chunkup_core::types::{
    UploadResp, FIELD_CHUNK_INDEX, FIELD_FILE, FIELD_FILENAME, FIELD_TOTAL_CHUNKS,
};
use time::{macros::format_description, OffsetDateTime};

use crate::storage::{sanitize_filename, ChunkStatus};

use super::AppState;

type ApiError = (StatusCode, &'static str);

fn bad_request(msg: &'static str) -> ApiError {
    (StatusCode::BAD_REQUEST, msg)
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default()
}

fn ok_resp(file: String) -> Json<UploadResp> {
    Json(UploadResp {
        status: StatusCode::OK.as_u16().to_string(),
        file,
        timestamp: timestamp(),
    })
}

pub async fn get_health() -> &'static str {
    "OK"
}

/// Maps a multipart read failure to a response. An oversized body keeps its 413, every
/// other failure is the client's malformed request.
fn multipart_error(error: MultipartError, msg: &'static str) -> ApiError {
    let status = error.status();
    tracing::warn!(%error, %status, "failed to read multipart body");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        (status, "request body too large")
    } else {
        bad_request(msg)
    }
}

async fn field_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|error| multipart_error(error, "malformed multipart field"))
}

async fn field_bytes(field: Field<'_>) -> Result<Bytes, ApiError> {
    field
        .bytes()
        .await
        .map_err(|error| multipart_error(error, "malformed multipart field"))
}

async fn next_field(multipart: &mut Multipart) -> Result<Option<Field<'_>>, ApiError> {
    multipart
        .next_field()
        .await
        .map_err(|error| multipart_error(error, "malformed multipart body"))
}

#[derive(Debug)]
struct ChunkForm {
    index: usize,
    total_chunks: usize,
    filename: String,
    data: Bytes,
}

impl ChunkForm {
    async fn parse(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut index = None;
        let mut total_chunks = None;
        let mut filename = None;
        let mut data = None;

        while let Some(field) = next_field(&mut multipart).await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                FIELD_FILE => data = Some(field_bytes(field).await?),
                FIELD_CHUNK_INDEX => index = Some(field_text(field).await?),
                FIELD_TOTAL_CHUNKS => total_chunks = Some(field_text(field).await?),
                FIELD_FILENAME => filename = Some(field_text(field).await?),
                _ => tracing::debug!(field = %name, "ignoring unknown multipart field"),
            }
        }

        let index = index
            .ok_or(bad_request("missing chunkIndex"))?
            .trim()
            .parse::<usize>()
            .map_err(|_| bad_request("chunkIndex is not a number"))?;
        let total_chunks = total_chunks
            .ok_or(bad_request("missing totalChunks"))?
            .trim()
            .parse::<usize>()
            .map_err(|_| bad_request("totalChunks is not a number"))?;
        let filename = filename.ok_or(bad_request("missing filenameWithExtension"))?;
        let data = data.ok_or(bad_request("missing file"))?;

        if total_chunks == 0 {
            return Err(bad_request("totalChunks must be positive"));
        }
        if index >= total_chunks {
            return Err(bad_request("chunkIndex out of range"));
        }
        let filename = sanitize_filename(&filename)
            .ok_or(bad_request("invalid filename"))?
            .to_string();

        Ok(Self {
            index,
            total_chunks,
            filename,
            data,
        })
    }
}

pub async fn post_upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResp>, ApiError> {
    let form = ChunkForm::parse(multipart).await?;
    tracing::debug!(
        filename = %form.filename,
        index = form.index,
        total_chunks = form.total_chunks,
        bytes = form.data.len(),
        "received chunk"
    );

    let status = state
        .store
        .store_chunk(&form.filename, form.index, form.total_chunks, &form.data)
        .await
        .map_err(|error| {
            tracing::error!(%error, filename = %form.filename, index = form.index, "failed to store chunk");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to store chunk")
        })?;
    match status {
        ChunkStatus::Pending { received, total } => {
            tracing::debug!(filename = %form.filename, received, total, "waiting for more chunks");
        }
        ChunkStatus::Assembled { path } => {
            tracing::info!(path = %path.display(), "upload assembled");
        }
    }

    Ok(ok_resp(form.filename))
}

pub async fn post_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResp>, ApiError> {
    while let Some(field) = next_field(&mut multipart).await? {
        if field.name() != Some(FIELD_FILE) {
            continue;
        }
        let filename = field
            .file_name()
            .and_then(sanitize_filename)
            .ok_or(bad_request("invalid filename"))?
            .to_string();
        let data = field_bytes(field).await?;

        state
            .store
            .store_file(&filename, &data)
            .await
            .map_err(|error| {
                tracing::error!(%error, %filename, "failed to store file");
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to store file")
            })?;
        tracing::info!(%filename, bytes = data.len(), "file uploaded");
        return Ok(ok_resp(filename));
    }

    Err(bad_request("missing file"))
}
