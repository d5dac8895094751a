use std::sync::Arc;

use async_trait::async_trait;
use data_model::{ChunkRequest, ChunkResponse};

/// The request/response channel could not produce a chunk response at all.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response with status {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{0}")]
    Other(String),
}

/// One retrieval attempt against the delivery coordinator.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<ChunkResponse, TransportError>;
}

#[async_trait]
impl<T: ChunkSource + ?Sized> ChunkSource for Arc<T> {
    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<ChunkResponse, TransportError> {
        (**self).fetch_chunk(request).await
    }
}
