use std::sync::Arc;

use async_trait::async_trait;
use blob_store::{BlobError, BlobStore};
use bytes::Bytes;
use data_model::{
    ArtifactId,
    ArtifactRecord,
    ArtifactStatus,
    ChunkRange,
    ChunkRequest,
    ChunkResponse,
    ChunkStatus,
    RangeError,
};
use state_store::{CompletionOutcome, MetadataStore, StoreError};
use tracing::{debug, info, instrument, warn};
use transfer_client::{ChunkSource, TransportError};

use crate::{http_objects::chunk_response, metrics::DeliveryMetrics};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("artifact {0} not found")]
    NotFound(ArtifactId),

    #[error("request id does not own artifact {0}")]
    Forbidden(ArtifactId),

    #[error("artifact {0} was already delivered")]
    AlreadyDelivered(ArtifactId),

    #[error(transparent)]
    InvalidRange(#[from] RangeError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl DeliveryError {
    pub fn status(&self) -> ChunkStatus {
        match self {
            DeliveryError::NotFound(_) => ChunkStatus::NotFound,
            DeliveryError::Forbidden(_) => ChunkStatus::Forbidden,
            DeliveryError::AlreadyDelivered(_) => ChunkStatus::AlreadyDelivered,
            DeliveryError::InvalidRange(_) => ChunkStatus::InvalidRange,
            DeliveryError::StoreUnavailable(_) => ChunkStatus::StoreUnavailable,
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(err: StoreError) -> Self {
        DeliveryError::StoreUnavailable(err.to_string())
    }
}

impl From<BlobError> for DeliveryError {
    fn from(err: BlobError) -> Self {
        DeliveryError::StoreUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub range: ChunkRange,
    pub bytes: Bytes,
    /// Whether this fetch flipped `is_downloaded`. Only ever true for one
    /// fetch of the last chunk.
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub enum ChunkResult {
    InProgress,
    Ready(Chunk),
}

/// Answers one retrieval attempt at a time. Holds no per-transfer state:
/// the byte range depends only on the chunk index and the blob size.
pub struct DeliveryCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    metrics: Arc<DeliveryMetrics>,
}

impl DeliveryCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        Self {
            metadata,
            blobs,
            metrics,
        }
    }

    pub async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<ChunkResult, DeliveryError> {
        let _timer = self.metrics.fetch_timer();
        let result = self.serve(request).await;
        match &result {
            Ok(ChunkResult::InProgress) => self.metrics.not_ready(),
            Ok(ChunkResult::Ready(chunk)) => {
                self.metrics
                    .chunk_served(chunk.bytes.len(), chunk.range.is_last);
                if chunk.completed {
                    self.metrics.completed();
                }
            }
            Err(err) => self.metrics.rejected(err.status()),
        }
        result
    }

    #[instrument(skip_all, fields(artifact_id = %request.artifact_id, chunk_index = request.chunk_index))]
    async fn serve(&self, request: &ChunkRequest) -> Result<ChunkResult, DeliveryError> {
        let record = self
            .metadata
            .get(&request.artifact_id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound(request.artifact_id.clone()))?;

        if !record.is_owned_by(&request.request_id) {
            return Err(DeliveryError::Forbidden(record.id));
        }
        if record.is_downloaded {
            return Err(DeliveryError::AlreadyDelivered(record.id));
        }
        if record.status == ArtifactStatus::Pending {
            debug!("artifact still pending");
            return Ok(ChunkResult::InProgress);
        }

        let blob_key = record.blob_key();
        let Some(size) = self.blobs.head_size(&blob_key).await? else {
            warn!(blob_key = %blob_key, "artifact marked ready but its blob is not visible yet");
            return Ok(ChunkResult::InProgress);
        };

        let range = ChunkRange::for_index(request.chunk_index, size)?;
        let Some(bytes) = self.blobs.read_range(&blob_key, range.as_range()).await? else {
            warn!(blob_key = %blob_key, "blob disappeared between size and range reads");
            return Ok(ChunkResult::InProgress);
        };
        if bytes.len() as u64 != range.len {
            return Err(DeliveryError::StoreUnavailable(format!(
                "short read of {}: expected {} bytes, got {}",
                blob_key,
                range.len,
                bytes.len()
            )));
        }

        let completed = range.is_last && self.mark_delivered(&record).await;
        Ok(ChunkResult::Ready(Chunk {
            range,
            bytes,
            completed,
        }))
    }

    /// Returns whether this call performed the transition. Losing the race to
    /// a concurrent fetch of the same chunk is not an error, and neither is a
    /// store fault: the chunk has been read and is served regardless.
    async fn mark_delivered(&self, record: &ArtifactRecord) -> bool {
        match self.metadata.conditional_set_downloaded(&record.id).await {
            Ok(CompletionOutcome::Marked) => {
                info!(artifact_id = %record.id, "artifact delivered");
                true
            }
            Ok(CompletionOutcome::AlreadySet) => {
                debug!(artifact_id = %record.id, "artifact already marked as delivered");
                false
            }
            Ok(CompletionOutcome::Missing) => {
                warn!(artifact_id = %record.id, "artifact record removed while serving last chunk");
                false
            }
            Err(err) => {
                warn!(
                    artifact_id = %record.id,
                    "failed to mark artifact as delivered, serving last chunk anyway: {}",
                    err
                );
                false
            }
        }
    }
}

#[async_trait]
impl ChunkSource for DeliveryCoordinator {
    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<ChunkResponse, TransportError> {
        Ok(chunk_response(
            &DeliveryCoordinator::fetch_chunk(self, request).await,
        ))
    }
}
