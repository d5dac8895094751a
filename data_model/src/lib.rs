pub mod chunk;
pub mod test_objects;

use std::fmt::{self, Display};

use anyhow::{anyhow, Result};
pub use chunk::{
    chunk_count,
    ChunkRange,
    ChunkRequest,
    ChunkResponse,
    ChunkStatus,
    RangeError,
    CHUNK_SIZE,
};
use delivery_utils::get_epoch_time_in_ms;
use derive_builder::Builder;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct ArtifactId(String);

impl Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ArtifactId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Readiness of an artifact, owned by the generation trigger.
///
/// A record starts `Pending` and is flipped to `Ready` once the generator has
/// finished writing the blob. The blob is immutable from then on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactStatus {
    #[default]
    Pending,
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[builder(build_fn(skip))]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    /// Opaque owner token handed to the client that requested generation.
    pub request_id: String,
    pub is_downloaded: bool,
    #[serde(default)]
    pub status: ArtifactStatus,
    pub created_at: u64,
    /// Parameters the artifact was requested with, kept for bookkeeping.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

impl ArtifactRecordBuilder {
    pub fn build(&mut self) -> Result<ArtifactRecord> {
        let id = self.id.clone().ok_or(anyhow!("id is required"))?;
        if id.get().is_empty() {
            return Err(anyhow!("id must not be empty"));
        }
        let request_id = self.request_id.clone().unwrap_or_else(|| nanoid!());
        let created_at = self.created_at.unwrap_or_else(get_epoch_time_in_ms);
        Ok(ArtifactRecord {
            id,
            request_id,
            is_downloaded: self.is_downloaded.unwrap_or(false),
            status: self.status.unwrap_or_default(),
            created_at,
            parameters: self.parameters.clone().flatten(),
        })
    }
}

impl ArtifactRecord {
    pub fn key(&self) -> String {
        Self::key_from(&self.id)
    }

    pub fn key_from(id: &ArtifactId) -> String {
        id.get().to_string()
    }

    /// Object key the generator writes the finished artifact to.
    pub fn blob_key(&self) -> String {
        format!("{}.wav", self.id.get())
    }

    pub fn is_owned_by(&self, request_id: &str) -> bool {
        self.request_id == request_id
    }

    pub fn is_ready(&self) -> bool {
        self.status == ArtifactStatus::Ready
    }

    pub fn is_expired(&self, now_ms: u64, retention_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) > retention_ms
    }
}
