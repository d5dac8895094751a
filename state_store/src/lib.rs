use async_trait::async_trait;
use data_model::{ArtifactId, ArtifactRecord};
use delivery_utils::AttemptError;

pub mod rocksdb;
pub mod serializer;

pub use crate::rocksdb::{ArtifactColumns, RocksDBMetadataStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open metadata store at {path}: {source}")]
    OpenDatabaseFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("artifact {id} already exists")]
    AlreadyExists { id: ArtifactId },

    #[error("artifact {id} not found")]
    NotFound { id: ArtifactId },

    /// Timed out or failed twice in a row.
    #[error("metadata store unavailable: {source}")]
    Unavailable {
        #[source]
        source: AttemptError<anyhow::Error>,
    },
}

/// Result of the one-way `is_downloaded` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// This call flipped the flag.
    Marked,
    /// Somebody else already did.
    AlreadySet,
    /// The record no longer exists.
    Missing,
}

/// Key-value storage of artifact records.
///
/// The delivery path only needs `get` and `conditional_set_downloaded`; the
/// rest serves the generation trigger and garbage collection.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, id: &ArtifactId) -> Result<Option<ArtifactRecord>, StoreError>;

    /// Fails with `AlreadyExists` when a record with the same id is present.
    async fn create(&self, record: ArtifactRecord) -> Result<(), StoreError>;

    async fn mark_ready(&self, id: &ArtifactId) -> Result<ArtifactRecord, StoreError>;

    /// Atomically sets `is_downloaded` if, and only if, it is still false.
    async fn conditional_set_downloaded(
        &self,
        id: &ArtifactId,
    ) -> Result<CompletionOutcome, StoreError>;

    async fn list(&self) -> Result<Vec<ArtifactRecord>, StoreError>;

    async fn delete(&self, id: &ArtifactId) -> Result<(), StoreError>;
}
