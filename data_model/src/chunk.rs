use std::ops::Range;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::ArtifactId;

/// Size of every chunk but the last one, in bytes.
pub const CHUNK_SIZE: u64 = 4_096_000;

/// Number of chunks an artifact of `size` bytes is delivered in.
///
/// A zero-length artifact is still delivered as one (empty) chunk.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub artifact_id: ArtifactId,
    pub request_id: String,
    pub chunk_index: u64,
}

impl ChunkRequest {
    pub fn new(artifact_id: ArtifactId, request_id: &str, chunk_index: u64) -> Self {
        Self {
            artifact_id,
            request_id: request_id.to_string(),
            chunk_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("chunk index {index} overflows the addressable byte range")]
    Overflow { index: u64 },

    #[error("chunk index {index} starts at byte {start}, past the end of a {size} byte artifact")]
    PastEnd { index: u64, start: u64, size: u64 },
}

/// Byte range covered by one chunk of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u64,
    pub start: u64,
    pub len: u64,
    pub is_last: bool,
}

impl ChunkRange {
    pub fn for_index(index: u64, size: u64) -> Result<Self, RangeError> {
        Self::with_chunk_size(index, size, CHUNK_SIZE)
    }

    pub fn with_chunk_size(index: u64, size: u64, chunk_size: u64) -> Result<Self, RangeError> {
        let start = index
            .checked_mul(chunk_size)
            .ok_or(RangeError::Overflow { index })?;
        if start >= size && !(index == 0 && size == 0) {
            return Err(RangeError::PastEnd { index, start, size });
        }
        let is_last = start.saturating_add(chunk_size) >= size;
        let len = chunk_size.min(size - start);
        Ok(Self {
            index,
            start,
            len,
            is_last,
        })
    }

    /// Inclusive offset of the last byte, `None` for an empty chunk.
    pub fn end(&self) -> Option<u64> {
        (self.len > 0).then(|| self.start + self.len - 1)
    }

    pub fn as_range(&self) -> Range<u64> {
        self.start..self.start + self.len
    }
}

/// Outcome kinds of a chunk fetch, as they appear on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChunkStatus {
    InProgress,
    Ready,
    NotFound,
    Forbidden,
    AlreadyDelivered,
    InvalidRange,
    StoreUnavailable,
}

/// Body of a retrieval endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub status: ChunkStatus,
    /// Base64 encoded chunk payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    #[serde(rename = "isLast", default, skip_serializing_if = "Option::is_none")]
    pub is_last: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChunkResponse {
    pub fn in_progress() -> Self {
        Self {
            status: ChunkStatus::InProgress,
            bytes: None,
            is_last: None,
            message: None,
        }
    }

    pub fn ready(payload: &[u8], is_last: bool) -> Self {
        Self {
            status: ChunkStatus::Ready,
            bytes: Some(STANDARD.encode(payload)),
            is_last: Some(is_last),
            message: None,
        }
    }

    pub fn rejected(status: ChunkStatus, message: &str) -> Self {
        Self {
            status,
            bytes: None,
            is_last: None,
            message: Some(message.to_string()),
        }
    }

    pub fn has_payload(&self) -> bool {
        self.bytes.is_some()
    }

    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        let encoded = self
            .bytes
            .as_deref()
            .ok_or(anyhow!("{} response carries no payload", self.status))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("invalid base64 chunk payload: {}", e))
    }
}
