use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use blob_store::BlobError;
use data_model::{ArtifactRecord, ArtifactStatus, ChunkResponse, ChunkStatus};
use serde::{Deserialize, Serialize};
use state_store::StoreError;
use tracing::error;

use crate::coordinator::{ChunkResult, DeliveryError};

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryAPIError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl DeliveryAPIError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string().as_str())
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: &str) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl IntoResponse for DeliveryAPIError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, self.message).into_response()
    }
}

impl From<StoreError> for DeliveryAPIError {
    fn from(e: StoreError) -> Self {
        let status_code = match &e {
            StoreError::AlreadyExists { .. } => StatusCode::CONFLICT,
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::OpenDatabaseFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status_code, &e.to_string())
    }
}

impl From<BlobError> for DeliveryAPIError {
    fn from(e: BlobError) -> Self {
        let status_code = match &e {
            BlobError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BlobError::AlreadyExists { .. } => StatusCode::CONFLICT,
            BlobError::Upload { .. } => StatusCode::BAD_REQUEST,
            BlobError::InvalidUrl { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status_code, &e.to_string())
    }
}

/// Body of `POST /artifacts`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateArtifact {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// What the generator should produce, stored as is.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedArtifact {
    pub id: String,
    pub request_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactReady {
    pub id: String,
    pub status: ArtifactStatus,
    pub size_bytes: u64,
    /// Number of chunks a client will fetch.
    pub chunks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_hash: Option<String>,
}

/// Query of `GET /artifacts/{id}/chunks`. The index is kept raw so that
/// malformed values are answered with `invalid_range` instead of a 400.
#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub request_id: Option<String>,
    pub chunk_index: Option<String>,
}

/// Query of the legacy `GET /download` endpoint.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub file_id: String,
    pub request_id: Option<String>,
    pub offset_num: Option<String>,
}

impl From<&ArtifactRecord> for CreatedArtifact {
    fn from(record: &ArtifactRecord) -> Self {
        Self {
            id: record.id.to_string(),
            request_id: record.request_id.clone(),
        }
    }
}

pub fn chunk_response(result: &Result<ChunkResult, DeliveryError>) -> ChunkResponse {
    match result {
        Ok(ChunkResult::InProgress) => ChunkResponse::in_progress(),
        Ok(ChunkResult::Ready(chunk)) => ChunkResponse::ready(&chunk.bytes, chunk.range.is_last),
        Err(err) => ChunkResponse::rejected(err.status(), &err.to_string()),
    }
}

pub fn chunk_status_code(status: ChunkStatus) -> StatusCode {
    match status {
        ChunkStatus::InProgress | ChunkStatus::Ready => StatusCode::OK,
        ChunkStatus::NotFound => StatusCode::NOT_FOUND,
        ChunkStatus::Forbidden => StatusCode::FORBIDDEN,
        ChunkStatus::AlreadyDelivered => StatusCode::GONE,
        ChunkStatus::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
        ChunkStatus::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// A retrieval endpoint answer. The JSON body is always present; payload
/// carrying answers are labelled `text/plain`.
pub struct ChunkReply(pub ChunkResponse);

impl IntoResponse for ChunkReply {
    fn into_response(self) -> Response {
        let status = chunk_status_code(self.0.status);
        let content_type = if self.0.has_payload() {
            "text/plain"
        } else {
            "application/json"
        };
        match serde_json::to_string(&self.0) {
            Ok(body) => (status, [(header::CONTENT_TYPE, content_type)], body).into_response(),
            Err(e) => DeliveryAPIError::internal_error(e.into()).into_response(),
        }
    }
}
