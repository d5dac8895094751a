use std::{path::Path, sync::Arc, time::Duration};

use ::rocksdb::{
    ColumnFamily,
    ColumnFamilyDescriptor,
    IteratorMode,
    Options,
    TransactionDB,
    TransactionDBOptions,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use data_model::{ArtifactId, ArtifactRecord, ArtifactStatus};
use delivery_utils::retry_once;
use strum::{AsRefStr, IntoEnumIterator};
use tracing::{debug, info};

use crate::{
    serializer::{JsonEncode, JsonEncoder},
    CompletionOutcome,
    MetadataStore,
    StoreError,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(AsRefStr, strum::Display, strum::EnumIter)]
pub enum ArtifactColumns {
    Artifacts, // ArtifactId -> ArtifactRecord
}

impl ArtifactColumns {
    pub fn cf_db<'a>(&self, db: &'a TransactionDB) -> Result<&'a ColumnFamily> {
        db.cf_handle(self.as_ref())
            .ok_or_else(|| anyhow!("failed to get column family handle for {}", self.as_ref()))
    }
}

/// Metadata store backed by a local RocksDB `TransactionDB`.
///
/// Every call runs on the blocking pool, bounded by the configured timeout
/// and retried once.
#[derive(Clone)]
pub struct RocksDBMetadataStore {
    db: Arc<TransactionDB>,
    timeout: Duration,
}

impl RocksDBMetadataStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("opening metadata store at {}", path.display());
        let open_failed = |source: anyhow::Error| StoreError::OpenDatabaseFailed {
            path: path.display().to_string(),
            source,
        };
        std::fs::create_dir_all(path).map_err(|e| open_failed(e.into()))?;

        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        let column_families = ArtifactColumns::iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            path,
            column_families,
        )
        .map_err(|e| open_failed(e.into()))?;

        Ok(Self {
            db: Arc::new(db),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(&TransactionDB) -> Result<T> + Clone + Send + 'static,
    {
        retry_once(op, self.timeout, || {
            let db = self.db.clone();
            let f = f.clone();
            async move {
                match tokio::task::spawn_blocking(move || f(&db)).await {
                    Ok(result) => result,
                    Err(err) => Err(anyhow::Error::from(err)),
                }
            }
        })
        .await
        .map_err(|source| StoreError::Unavailable { source })
    }
}

fn get_record(db: &TransactionDB, key: &str) -> Result<Option<ArtifactRecord>> {
    let cf = ArtifactColumns::Artifacts.cf_db(db)?;
    db.get_cf(cf, key)?
        .map(|bytes| JsonEncoder::decode(&bytes))
        .transpose()
}

fn insert_record(db: &TransactionDB, record: &ArtifactRecord) -> Result<bool> {
    let cf = ArtifactColumns::Artifacts.cf_db(db)?;
    let txn = db.transaction();
    if txn.get_for_update_cf(cf, record.key(), true)?.is_some() {
        return Ok(false);
    }
    txn.put_cf(cf, record.key(), JsonEncoder::encode(record)?)?;
    txn.commit()?;
    Ok(true)
}

fn set_ready(db: &TransactionDB, key: &str) -> Result<Option<ArtifactRecord>> {
    let cf = ArtifactColumns::Artifacts.cf_db(db)?;
    let txn = db.transaction();
    let Some(bytes) = txn.get_for_update_cf(cf, key, true)? else {
        return Ok(None);
    };
    let mut record: ArtifactRecord = JsonEncoder::decode(&bytes)?;
    if record.status != ArtifactStatus::Ready {
        record.status = ArtifactStatus::Ready;
        txn.put_cf(cf, key, JsonEncoder::encode(&record)?)?;
    }
    txn.commit()?;
    Ok(Some(record))
}

fn set_downloaded(db: &TransactionDB, key: &str) -> Result<CompletionOutcome> {
    let cf = ArtifactColumns::Artifacts.cf_db(db)?;
    let txn = db.transaction();
    // The exclusive lock serializes concurrent final-chunk fetches: the
    // second reader sees the committed flag.
    let Some(bytes) = txn.get_for_update_cf(cf, key, true)? else {
        return Ok(CompletionOutcome::Missing);
    };
    let mut record: ArtifactRecord = JsonEncoder::decode(&bytes)?;
    if record.is_downloaded {
        return Ok(CompletionOutcome::AlreadySet);
    }
    record.is_downloaded = true;
    txn.put_cf(cf, key, JsonEncoder::encode(&record)?)?;
    txn.commit()?;
    Ok(CompletionOutcome::Marked)
}

fn all_records(db: &TransactionDB) -> Result<Vec<ArtifactRecord>> {
    let cf = ArtifactColumns::Artifacts.cf_db(db)?;
    let mut records = Vec::new();
    for kv in db.iterator_cf(cf, IteratorMode::Start) {
        let (_, value) = kv?;
        records.push(JsonEncoder::decode(&value)?);
    }
    Ok(records)
}

fn remove_record(db: &TransactionDB, key: &str) -> Result<()> {
    let cf = ArtifactColumns::Artifacts.cf_db(db)?;
    db.delete_cf(cf, key)?;
    Ok(())
}

#[async_trait]
impl MetadataStore for RocksDBMetadataStore {
    async fn get(&self, id: &ArtifactId) -> Result<Option<ArtifactRecord>, StoreError> {
        let key = ArtifactRecord::key_from(id);
        self.run("metadata get", move |db| get_record(db, &key))
            .await
    }

    async fn create(&self, record: ArtifactRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        let record = Arc::new(record);
        let created = self
            .run("metadata create", move |db| insert_record(db, &record))
            .await?;
        if !created {
            return Err(StoreError::AlreadyExists { id });
        }
        debug!(artifact_id = %id, "artifact record created");
        Ok(())
    }

    async fn mark_ready(&self, id: &ArtifactId) -> Result<ArtifactRecord, StoreError> {
        let key = ArtifactRecord::key_from(id);
        self.run("metadata mark_ready", move |db| set_ready(db, &key))
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    async fn conditional_set_downloaded(
        &self,
        id: &ArtifactId,
    ) -> Result<CompletionOutcome, StoreError> {
        let key = ArtifactRecord::key_from(id);
        self.run("metadata set_downloaded", move |db| {
            set_downloaded(db, &key)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.run("metadata list", all_records).await
    }

    async fn delete(&self, id: &ArtifactId) -> Result<(), StoreError> {
        let key = ArtifactRecord::key_from(id);
        self.run("metadata delete", move |db| remove_record(db, &key))
            .await
    }
}
