use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use blob_store::BlobStore;
use data_model::{chunk_count, ArtifactId, ArtifactRecord, ArtifactRecordBuilder};
use futures::TryStreamExt;
use nanoid::nanoid;
use tracing::info;

use super::RouteState;
use crate::http_objects::{ArtifactReady, CreateArtifact, CreatedArtifact, DeliveryAPIError};

fn validate_id(id: &str) -> Result<(), DeliveryAPIError> {
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        return Err(DeliveryAPIError::bad_request(&format!(
            "invalid artifact id: {:?}",
            id
        )));
    }
    Ok(())
}

async fn existing_record(
    state: &RouteState,
    id: &ArtifactId,
) -> Result<ArtifactRecord, DeliveryAPIError> {
    state
        .metadata
        .get(id)
        .await?
        .ok_or_else(|| DeliveryAPIError::not_found(&format!("artifact {} not found", id)))
}

/// Registers a new artifact and hands out the token that owns it.
pub async fn create_artifact(
    State(state): State<RouteState>,
    Json(request): Json<CreateArtifact>,
) -> Result<(StatusCode, Json<CreatedArtifact>), DeliveryAPIError> {
    let id = request.id.unwrap_or_else(|| nanoid!());
    validate_id(&id)?;

    let record = ArtifactRecordBuilder::default()
        .id(ArtifactId::new(id))
        .request_id(nanoid!())
        .parameters(request.parameters)
        .build()
        .map_err(DeliveryAPIError::internal_error)?;
    state.metadata.create(record.clone()).await?;

    info!(artifact_id = %record.id, "artifact requested");
    Ok((StatusCode::CREATED, Json(CreatedArtifact::from(&record))))
}

/// Writes the generated artifact to the object store, then marks it ready.
/// Blobs are write-once: a second upload, or one racing a blob written
/// straight to the bucket, is answered 409 and leaves the first untouched.
pub async fn upload_blob(
    Path(id): Path<String>,
    State(state): State<RouteState>,
    body: Body,
) -> Result<Json<ArtifactReady>, DeliveryAPIError> {
    let id = ArtifactId::new(id);
    let record = existing_record(&state, &id).await?;
    if record.is_ready() {
        return Err(DeliveryAPIError::conflict(&format!(
            "artifact {} already has a blob",
            id
        )));
    }

    let stream = body
        .into_data_stream()
        .map_err(|e| anyhow!("error reading request body: {}", e));
    let put_result = state.blob_storage.put(&record.blob_key(), stream).await?;
    let record = state.metadata.mark_ready(&id).await?;

    info!(
        artifact_id = %id,
        size_bytes = put_result.size_bytes,
        "artifact blob stored"
    );
    Ok(Json(ArtifactReady {
        id: id.to_string(),
        status: record.status,
        size_bytes: put_result.size_bytes,
        chunks: chunk_count(put_result.size_bytes),
        sha256_hash: Some(put_result.sha256_hash),
    }))
}

/// For generators that write straight to the bucket: flips the record to
/// ready once its blob is visible.
pub async fn mark_ready(
    Path(id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Json<ArtifactReady>, DeliveryAPIError> {
    let id = ArtifactId::new(id);
    let record = existing_record(&state, &id).await?;
    let Some(size_bytes) = state.blob_storage.head_size(&record.blob_key()).await? else {
        return Err(DeliveryAPIError::conflict(&format!(
            "blob {} has not been written",
            record.blob_key()
        )));
    };
    let record = state.metadata.mark_ready(&id).await?;

    info!(artifact_id = %id, size_bytes, "artifact marked ready");
    Ok(Json(ArtifactReady {
        id: id.to_string(),
        status: record.status,
        size_bytes,
        chunks: chunk_count(size_bytes),
        sha256_hash: None,
    }))
}
