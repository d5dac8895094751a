use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use axum_server::Handle;
use blob_store::{BlobStorageConfig, PutResult};
use bytes::Bytes;
use data_model::{test_objects::tests::mock_artifact, ArtifactRecord};
use futures::stream;
use state_store::MetadataStore;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::ServerConfig, service::Service};

pub struct TestService {
    pub service: Service,
    _temp_dir: tempfile::TempDir,
}

impl TestService {
    pub async fn new() -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;

        let cfg = ServerConfig {
            env: "test".to_string(),
            instance_id: Some("test-instance".to_string()),
            listen_addr: "127.0.0.1:0".to_string(),
            state_store_path: temp_dir
                .path()
                .join("state_store")
                .display()
                .to_string(),
            blob_storage: BlobStorageConfig::in_memory(),
            store_timeout_secs: 5,
            ..Default::default()
        };
        let srv = Service::new(cfg).await?;

        Ok(Self {
            service: srv,
            _temp_dir: temp_dir,
        })
    }

    /// Stores a pending artifact record, as the generation trigger would.
    pub async fn create_artifact(&self, id: &str, request_id: &str) -> Result<ArtifactRecord> {
        let record = mock_artifact(id, request_id);
        self.service.metadata.create(record.clone()).await?;
        Ok(record)
    }

    /// Writes the blob without touching the record's status.
    pub async fn write_blob(&self, record: &ArtifactRecord, data: Vec<u8>) -> Result<PutResult> {
        let put = self
            .service
            .blob_storage
            .put(&record.blob_key(), stream::iter(vec![Ok(Bytes::from(data))]))
            .await?;
        Ok(put)
    }

    pub async fn mark_ready(&self, record: &ArtifactRecord) -> Result<ArtifactRecord> {
        Ok(self.service.metadata.mark_ready(&record.id).await?)
    }

    pub async fn get_artifact(&self, record: &ArtifactRecord) -> Result<ArtifactRecord> {
        self.service
            .metadata
            .get(&record.id)
            .await?
            .ok_or_else(|| anyhow!("artifact {} not found", record.id))
    }

    /// Serves the HTTP API on an ephemeral port until the returned handle is
    /// shut down.
    pub async fn start_http(&self) -> Result<(SocketAddr, Handle)> {
        let handle = Handle::new();
        let service = self.service.clone();
        let serve_handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = service.serve(serve_handle).await {
                tracing::error!("test server stopped: {:?}", e);
            }
        });
        let addr = handle
            .listening()
            .await
            .ok_or_else(|| anyhow!("test server failed to bind"))?;
        Ok((addr, handle))
    }
}
