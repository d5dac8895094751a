use async_trait::async_trait;
use data_model::{ChunkRequest, ChunkResponse};
use reqwest::Url;
use tracing::trace;

use crate::source::{ChunkSource, TransportError};

/// Fetches chunks from the `GET /artifacts/{id}/chunks` endpoint.
#[derive(Debug, Clone)]
pub struct HttpChunkSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpChunkSource {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl {
                url: base_url.to_string(),
                reason: "url cannot be a base".to_string(),
            });
        }
        Ok(Self { client, base_url })
    }

    fn chunk_url(&self, request: &ChunkRequest) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["artifacts", request.artifact_id.get(), "chunks"]);
        }
        url
    }
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<ChunkResponse, TransportError> {
        let url = self.chunk_url(request);
        trace!(%url, chunk_index = request.chunk_index, "fetching chunk");
        // The query carries the ownership token, so errors drop the url.
        let response = self
            .client
            .get(url)
            .query(&[
                ("request_id", request.request_id.clone()),
                ("chunk_index", request.chunk_index.to_string()),
            ])
            .send()
            .await
            .map_err(|e| TransportError::Request(e.without_url()))?;

        // Error kinds travel in the body, so the body is decoded whatever the
        // status code says.
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.without_url()))?;
        serde_json::from_str(&body).map_err(|_| TransportError::UnexpectedResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use data_model::ArtifactId;

    use super::*;

    #[test]
    fn test_chunk_url() {
        let request = ChunkRequest::new(ArtifactId::from("a b"), "abc", 2);
        for base in ["http://localhost:8900", "http://localhost:8900/"] {
            let source = HttpChunkSource::new(base).unwrap();
            assert_eq!(
                source.chunk_url(&request).as_str(),
                "http://localhost:8900/artifacts/a%20b/chunks"
            );
        }

        let prefixed = HttpChunkSource::new("https://cdn.example.com/wave/").unwrap();
        assert_eq!(
            prefixed.chunk_url(&request).as_str(),
            "https://cdn.example.com/wave/artifacts/a%20b/chunks"
        );
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(matches!(
            HttpChunkSource::new("mailto:someone@example.com"),
            Err(TransportError::InvalidUrl { .. })
        ));
        assert!(HttpChunkSource::new("not a url").is_err());
    }
}
