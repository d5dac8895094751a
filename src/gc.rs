use std::sync::Arc;

use anyhow::Result;
use blob_store::{BlobStorage, BlobStore};
use delivery_utils::get_epoch_time_in_ms;
use state_store::MetadataStore;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::GcConfig;

/// Periodically reclaims artifact storage.
///
/// Delivered artifacts lose their blob but keep their record, so the owner
/// keeps getting `already_delivered` instead of `not_found`. Records are
/// only removed for artifacts that expired without being delivered, blob
/// first so a record never outlives the knowledge of where its blob was.
pub struct Gc {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<BlobStorage>,
    config: GcConfig,
    shutdown_rx: watch::Receiver<()>,
}

impl Gc {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<BlobStorage>,
        config: GcConfig,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self {
            metadata,
            storage,
            config,
            shutdown_rx,
        }
    }

    pub async fn start(&mut self) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("error collecting artifacts: {:?}", e);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("gc: shutdown signal received");
                    return;
                }
            }
        }
    }

    /// One collection pass. Returns the number of blobs and records removed.
    pub async fn run_once(&self) -> Result<GcStats> {
        let now = get_epoch_time_in_ms();
        let retention_ms = self.config.retention_ms();
        let mut stats = GcStats::default();
        for record in self.metadata.list().await? {
            let expired = record.is_expired(now, retention_ms);
            if !record.is_downloaded && !expired {
                continue;
            }
            let blob_key = record.blob_key();
            if self.storage.head_size(&blob_key).await?.is_some() {
                debug!(
                    artifact_id = %record.id,
                    is_downloaded = record.is_downloaded,
                    "deleting artifact blob"
                );
                self.storage.delete(&blob_key).await?;
                stats.blobs_removed += 1;
            }
            if expired && !record.is_downloaded {
                debug!(artifact_id = %record.id, "deleting undelivered artifact record");
                self.metadata.delete(&record.id).await?;
                stats.records_removed += 1;
            }
        }
        if stats != GcStats::default() {
            info!(
                blobs_removed = stats.blobs_removed,
                records_removed = stats.records_removed,
                "gc: reclaimed artifacts"
            );
        }
        Ok(stats)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub blobs_removed: usize,
    pub records_removed: usize,
}
