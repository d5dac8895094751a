//! Error types for blob store operations.

use delivery_utils::AttemptError;

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Invalid URL format or scheme.
    #[error("invalid blob storage url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The store did not answer within its timeout, or kept failing after a
    /// retry.
    #[error("blob store unavailable: {source}")]
    Unavailable {
        #[source]
        source: AttemptError<object_store::Error>,
    },

    /// Blobs are write-once.
    #[error("blob {key} already exists")]
    AlreadyExists { key: String },

    /// The upload stream itself failed.
    #[error("blob upload failed: {source}")]
    Upload {
        #[source]
        source: anyhow::Error,
    },
}

impl From<AttemptError<object_store::Error>> for BlobError {
    fn from(source: AttemptError<object_store::Error>) -> Self {
        BlobError::Unavailable { source }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        BlobError::Unavailable {
            source: AttemptError::Failed {
                op: "object_store".to_string(),
                error: err,
            },
        }
    }
}
