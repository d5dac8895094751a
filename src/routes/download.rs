use axum::extract::{Path, Query, State};
use data_model::{ArtifactId, ChunkRequest, ChunkResponse, ChunkStatus};
use tracing::warn;

use super::RouteState;
use crate::http_objects::{chunk_response, ChunkQuery, ChunkReply, DownloadQuery};

/// One chunk of an artifact, polled until the whole artifact is delivered.
pub async fn fetch_chunk(
    Path(id): Path<String>,
    Query(query): Query<ChunkQuery>,
    State(state): State<RouteState>,
) -> ChunkReply {
    serve_chunk(
        &state,
        ArtifactId::new(id),
        query.request_id.unwrap_or_default(),
        query.chunk_index.as_deref(),
    )
    .await
}

/// `GET /download?file_id=..&request_id=..&offset_num=..`
pub async fn legacy_download(
    Query(query): Query<DownloadQuery>,
    State(state): State<RouteState>,
) -> ChunkReply {
    serve_chunk(
        &state,
        ArtifactId::new(query.file_id),
        query.request_id.unwrap_or_default(),
        query.offset_num.as_deref(),
    )
    .await
}

async fn serve_chunk(
    state: &RouteState,
    artifact_id: ArtifactId,
    request_id: String,
    raw_index: Option<&str>,
) -> ChunkReply {
    let chunk_index = match parse_chunk_index(raw_index) {
        Ok(index) => index,
        Err(raw) => {
            warn!(artifact_id = %artifact_id, raw, "rejecting malformed chunk index");
            state.metrics.rejected(ChunkStatus::InvalidRange);
            return ChunkReply(ChunkResponse::rejected(
                ChunkStatus::InvalidRange,
                &format!("invalid chunk index: {}", raw),
            ));
        }
    };

    let request = ChunkRequest::new(artifact_id, &request_id, chunk_index);
    let result = state.coordinator.fetch_chunk(&request).await;
    ChunkReply(chunk_response(&result))
}

/// Missing index means the first chunk. Anything that is not a plain
/// non-negative integer comes back as `Err` with the raw value.
fn parse_chunk_index(raw: Option<&str>) -> Result<u64, &str> {
    match raw.map(str::trim) {
        None | Some("") => Ok(0),
        Some(raw) => raw.parse::<u64>().map_err(|_| raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chunk_index() {
        assert_eq!(parse_chunk_index(None), Ok(0));
        assert_eq!(parse_chunk_index(Some("")), Ok(0));
        assert_eq!(parse_chunk_index(Some("3")), Ok(3));
        assert_eq!(parse_chunk_index(Some(" 3 ")), Ok(3));
        assert_eq!(parse_chunk_index(Some("-1")), Err("-1"));
        assert_eq!(parse_chunk_index(Some("1.5")), Err("1.5"));
        assert_eq!(parse_chunk_index(Some("abc")), Err("abc"));
        assert_eq!(
            parse_chunk_index(Some("18446744073709551616")),
            Err("18446744073709551616")
        );
    }
}
