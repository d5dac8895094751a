use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use axum_server::Handle;
use blob_store::BlobStorage;
use state_store::{MetadataStore, RocksDBMetadataStore};
use tokio::{
    self,
    signal,
    sync::{watch, Mutex},
};
use tracing::{error, info};

use crate::{
    config::ServerConfig,
    coordinator::DeliveryCoordinator,
    gc::Gc,
    metrics::DeliveryMetrics,
    middleware::InstanceRequestSpan,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    pub blob_storage: Arc<BlobStorage>,
    pub metadata: Arc<dyn MetadataStore>,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub metrics: Arc<DeliveryMetrics>,
    pub gc_executor: Arc<Mutex<Gc>>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?
                .with_timeout(config.store_timeout()),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            RocksDBMetadataStore::open(Path::new(&config.state_store_path))
                .context("error initializing metadata store")?
                .with_timeout(config.store_timeout()),
        );

        let metrics = Arc::new(DeliveryMetrics::new());
        let coordinator = Arc::new(DeliveryCoordinator::new(
            metadata.clone(),
            blob_storage.clone(),
            metrics.clone(),
        ));

        let gc_executor = Arc::new(Mutex::new(Gc::new(
            metadata.clone(),
            blob_storage.clone(),
            config.gc.clone(),
            shutdown_rx.clone(),
        )));

        Ok(Self {
            config,
            shutdown_tx,
            shutdown_rx,
            blob_storage,
            metadata,
            coordinator,
            metrics,
            gc_executor,
        })
    }

    pub fn router(&self) -> Router {
        let route_state = RouteState {
            coordinator: self.coordinator.clone(),
            metadata: self.metadata.clone(),
            blob_storage: self.blob_storage.clone(),
            metrics: self.metrics.clone(),
        };
        create_routes(
            route_state,
            InstanceRequestSpan::new(&self.config.env, &self.config.instance_id()),
        )
    }

    pub async fn start(&mut self) -> Result<()> {
        let gc_executor = self.gc_executor.clone();
        tokio::spawn(async move {
            let mut gc_executor_guard = gc_executor.lock().await;
            gc_executor_guard.start().await;
        });

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh, shutdown_tx).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        self.serve(handle).await
    }

    /// Serves the API until `handle` is shut down. `handle.listening()`
    /// reports the bound address, which matters for port 0.
    pub async fn serve(&self, handle: Handle) -> Result<()> {
        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(self.router().into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    if shutdown_tx.send(()).is_err() {
        error!("no background task was listening for shutdown");
    }
    info!("signal received, shutting down server gracefully");
}
