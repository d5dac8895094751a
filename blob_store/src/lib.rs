use std::{env, fmt::Debug, ops::Range, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use delivery_utils::retry_once;
use futures::StreamExt;
use object_store::{
    aws::{AmazonS3Builder, AmazonS3ConfigKey},
    parse_url,
    path::Path,
    ObjectStore,
    ObjectStoreScheme,
    PutMode,
    PutOptions,
    PutPayload,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

mod error;
mod metrics;

pub use error::{BlobError, BlobResult};
pub use metrics::{BlobMetrics, Timer};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    /// `file://`, `s3://` or `memory:///` url of the directory holding
    /// artifact blobs.
    pub path: String,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: format!("file://{}", path),
        }
    }

    pub fn in_memory() -> Self {
        BlobStorageConfig {
            path: "memory:///".to_string(),
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = env::current_dir()
            .map(|dir| dir.join("wave_storage/blobs"))
            .map(|dir| format!("file://{}", dir.display()))
            .unwrap_or_else(|_| "file:///tmp/wave_storage/blobs".to_string());
        info!("using blob store path: {}", blob_store_path);
        BlobStorageConfig {
            path: blob_store_path,
        }
    }
}

/// Read side of the object store as the delivery path sees it.
///
/// Absence is not an error: a missing blob is reported as `None` so callers
/// can treat it as "not generated yet".
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn head_size(&self, key: &str) -> BlobResult<Option<u64>>;

    async fn read_range(&self, key: &str, range: Range<u64>) -> BlobResult<Option<Bytes>>;
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
    timeout: Duration,
    metrics: BlobMetrics,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self, BlobError> {
        let (object_store, path) = Self::build_object_store(&config.path)?;
        Ok(Self::from_object_store(Arc::from(object_store), path))
    }

    pub fn from_object_store(object_store: Arc<dyn ObjectStore>, path: Path) -> Self {
        Self {
            object_store,
            path,
            timeout: DEFAULT_TIMEOUT,
            metrics: BlobMetrics::default(),
        }
    }

    /// Bound applied to every single object store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build_object_store(url_str: &str) -> Result<(Box<dyn ObjectStore>, Path), BlobError> {
        let invalid = |reason: String| BlobError::InvalidUrl {
            url: url_str.to_string(),
            reason,
        };
        let url = url_str
            .parse::<Url>()
            .map_err(|e| invalid(e.to_string()))?;
        let (scheme, path) = ObjectStoreScheme::parse(&url).map_err(|e| invalid(e.to_string()))?;
        match scheme {
            ObjectStoreScheme::AmazonS3 => {
                // inject AWS environment variables to prioritize keys over instance metadata
                // credentials.
                let opts: Vec<(AmazonS3ConfigKey, String)> = std::env::vars_os()
                    .filter_map(|(os_key, os_value)| {
                        if let (Some(key), Some(value)) = (os_key.to_str(), os_value.to_str()) {
                            if key.starts_with("AWS_") {
                                if let Ok(config_key) = key.to_ascii_lowercase().parse() {
                                    return Some((config_key, String::from(value)));
                                }
                            }
                        }
                        None
                    })
                    .collect();

                let mut s3_builder = AmazonS3Builder::new().with_url(url_str);
                for (key, value) in opts.iter() {
                    s3_builder = s3_builder.with_config(*key, value.clone());
                }
                let s3 = s3_builder.build().map_err(|e| invalid(e.to_string()))?;
                Ok((Box::new(s3), path))
            }
            _ => parse_url(&url).map_err(|e| invalid(e.to_string())),
        }
    }

    fn location(&self, key: &str) -> Path {
        self.path.child(key)
    }

    /// Writes `data` to the blob at `key`, hashing it on the way. Blobs are
    /// write-once: if `key` already exists, nothing is written and
    /// `AlreadyExists` is returned.
    ///
    /// The stream is buffered so the object appears in a single conditional
    /// put. Uploads are not retried since the stream cannot be replayed.
    pub async fn put(
        &self,
        key: &str,
        mut data: impl futures::Stream<Item = Result<Bytes>> + Send + Unpin,
    ) -> Result<PutResult, BlobError> {
        let _timer = Timer::start(&self.metrics.operations, "put");
        let mut hasher = Sha256::new();
        let mut chunks = Vec::new();
        let mut size_bytes = 0;
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(|source| {
                self.metrics.record_error("put");
                BlobError::Upload { source }
            })?;
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            chunks.push(chunk);
        }

        let path = self.location(key);
        let opts = PutOptions::from(PutMode::Create);
        match self
            .object_store
            .put_opts(&path, PutPayload::from_iter(chunks), opts)
            .await
        {
            Ok(_) => {}
            Err(object_store::Error::AlreadyExists { .. }) => {
                warn!(key, "refusing to overwrite existing blob");
                return Err(BlobError::AlreadyExists {
                    key: key.to_string(),
                });
            }
            Err(err) => {
                self.metrics.record_error("put");
                return Err(err.into());
            }
        }

        let hash = format!("{:x}", hasher.finalize());
        debug!(key, size_bytes, "blob written");
        Ok(PutResult {
            url: path.to_string(),
            size_bytes,
            sha256_hash: hash,
        })
    }

    /// Removes the blob at `key`. Deleting an absent blob succeeds.
    pub async fn delete(&self, key: &str) -> BlobResult<()> {
        let _timer = Timer::start(&self.metrics.operations, "delete");
        let location = self.location(key);
        retry_once("blob delete", self.timeout, || {
            let store = self.object_store.clone();
            let location = location.clone();
            async move {
                match store.delete(&location).await {
                    Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                    Err(err) => Err(err),
                }
            }
        })
        .await
        .map_err(|err| {
            self.metrics.record_error("delete");
            BlobError::from(err)
        })
    }
}

#[async_trait]
impl BlobStore for BlobStorage {
    async fn head_size(&self, key: &str) -> BlobResult<Option<u64>> {
        let _timer = Timer::start(&self.metrics.operations, "head");
        let location = self.location(key);
        retry_once("blob head", self.timeout, || {
            let store = self.object_store.clone();
            let location = location.clone();
            async move {
                match store.head(&location).await {
                    Ok(meta) => Ok(Some(meta.size)),
                    Err(object_store::Error::NotFound { .. }) => Ok(None),
                    Err(err) => Err(err),
                }
            }
        })
        .await
        .map_err(|err| {
            self.metrics.record_error("head");
            BlobError::from(err)
        })
    }

    async fn read_range(&self, key: &str, range: Range<u64>) -> BlobResult<Option<Bytes>> {
        let _timer = Timer::start(&self.metrics.operations, "read_range");
        let location = self.location(key);
        retry_once("blob read_range", self.timeout, || {
            let store = self.object_store.clone();
            let location = location.clone();
            let range = range.clone();
            async move {
                // Object stores reject empty byte ranges, so only check for
                // existence.
                let read = if range.is_empty() {
                    store.head(&location).await.map(|_| Bytes::new())
                } else {
                    store.get_range(&location, range).await
                };
                match read {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(object_store::Error::NotFound { .. }) => Ok(None),
                    Err(err) => Err(err),
                }
            }
        })
        .await
        .map_err(|err| {
            self.metrics.record_error("read_range");
            BlobError::from(err)
        })
    }
}

impl Debug for BlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStorage")
            .field("object_store", &self.object_store.to_string())
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn payload(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    async fn put_bytes(storage: &BlobStorage, key: &str, data: Vec<u8>) -> PutResult {
        let chunks: Vec<Result<Bytes>> = data
            .chunks(1000)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        storage.put(key, stream::iter(chunks)).await.unwrap()
    }

    #[tokio::test]
    async fn test_head_and_range_reads_in_memory() {
        let storage = BlobStorage::new(BlobStorageConfig::in_memory()).unwrap();
        let data = payload(5_000);
        let put = put_bytes(&storage, "a.wav", data.clone()).await;
        assert_eq!(put.size_bytes, 5_000);
        assert_eq!(put.sha256_hash, format!("{:x}", Sha256::digest(&data)));

        assert_eq!(storage.head_size("a.wav").await.unwrap(), Some(5_000));
        let bytes = storage
            .read_range("a.wav", 1_000..2_500)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&bytes[..], &data[1_000..2_500]);

        let tail = storage
            .read_range("a.wav", 4_999..5_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&tail[..], &data[4_999..]);
    }

    #[tokio::test]
    async fn test_absent_blob_is_none() {
        let storage = BlobStorage::new(BlobStorageConfig::in_memory()).unwrap();
        assert_eq!(storage.head_size("missing.wav").await.unwrap(), None);
        assert!(storage
            .read_range("missing.wav", 0..10)
            .await
            .unwrap()
            .is_none());
        assert!(storage
            .read_range("missing.wav", 0..0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_blob() {
        let storage = BlobStorage::new(BlobStorageConfig::in_memory()).unwrap();
        let put = put_bytes(&storage, "empty.wav", vec![]).await;
        assert_eq!(put.size_bytes, 0);
        assert_eq!(storage.head_size("empty.wav").await.unwrap(), Some(0));
        let bytes = storage.read_range("empty.wav", 0..0).await.unwrap().unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let storage = BlobStorage::new(BlobStorageConfig::in_memory()).unwrap();
        put_bytes(&storage, "gone.wav", payload(10)).await;
        storage.delete("gone.wav").await.unwrap();
        assert_eq!(storage.head_size("gone.wav").await.unwrap(), None);
        storage.delete("gone.wav").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_filesystem_backend() {
        let dir = tempfile::tempdir().unwrap();
        let storage =
            BlobStorage::new(BlobStorageConfig::new(dir.path().to_str().unwrap())).unwrap();
        let data = payload(3_000);
        put_bytes(&storage, "local.wav", data.clone()).await;

        assert!(dir.path().join("local.wav").exists());
        assert_eq!(storage.head_size("local.wav").await.unwrap(), Some(3_000));
        let bytes = storage
            .read_range("local.wav", 0..3_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&bytes[..], &data[..]);
    }

    #[tokio::test]
    async fn test_failed_upload_stream() {
        let storage = BlobStorage::new(BlobStorageConfig::in_memory()).unwrap();
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"RIFF")),
            Err(anyhow::anyhow!("client went away")),
        ];
        let err = storage.put("broken.wav", stream::iter(chunks)).await.unwrap_err();
        assert!(matches!(err, BlobError::Upload { .. }));
        assert_eq!(storage.head_size("broken.wav").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blobs_are_write_once() {
        let storage = BlobStorage::new(BlobStorageConfig::in_memory()).unwrap();
        let original = payload(2_000);
        put_bytes(&storage, "once.wav", original.clone()).await;

        let err = storage
            .put(
                "once.wav",
                stream::iter(vec![Ok(Bytes::from_static(b"overwrite"))]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists { .. }));

        let bytes = storage
            .read_range("once.wav", 0..2_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&bytes[..], &original[..]);
    }

    #[tokio::test]
    async fn test_local_filesystem_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage =
            BlobStorage::new(BlobStorageConfig::new(dir.path().to_str().unwrap())).unwrap();
        put_bytes(&storage, "once.wav", payload(10)).await;
        let err = storage
            .put("once.wav", stream::iter(vec![Ok(Bytes::from_static(b"x"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists { .. }));
        assert_eq!(storage.head_size("once.wav").await.unwrap(), Some(10));
    }

    #[test]
    fn test_invalid_url() {
        let err = BlobStorage::new(BlobStorageConfig {
            path: "not a url".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, BlobError::InvalidUrl { .. }));
    }
}
