use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::blob::LOGICAL_BUCKETS;
use crate::error::{IteratorError, MigrationError};
use crate::migrator::BlobMigrator;
use crate::store::Store;
use crate::watcher::MigrationWatcher;

pub struct BlobstoreMigrator {
    pool: Arc<Semaphore>,
    migrator: Arc<dyn BlobMigrator>,
    excluded_buckets: HashSet<String>,
    watcher: Arc<dyn MigrationWatcher>,
}

impl BlobstoreMigrator {
    pub fn new(
        worker_pool_capacity: usize,
        migrator: Arc<dyn BlobMigrator>,
        excluded_buckets: HashSet<String>,
        watcher: Arc<dyn MigrationWatcher>,
    ) -> Result<Self, MigrationError> {
        if worker_pool_capacity == 0 {
            return Err(MigrationError::Configuration("worker pool capacity must be at least 1".into()));
        }
        Ok(Self { pool: Arc::new(Semaphore::new(worker_pool_capacity)), migrator, excluded_buckets, watcher })
    }

    pub async fn migrate(&self, destination: Arc<dyn Store>, source: Arc<dyn Store>) -> Result<(), MigrationError> {
        self.watcher.migration_did_start(destination.as_ref(), source.as_ref());

        for bucket in LOGICAL_BUCKETS {
            if self.excluded_buckets.contains(bucket) {
                continue;
            }
            self.migrate_bucket(bucket, &destination, &source).await?;
        }

        self.watcher.migration_did_finish();
        Ok(())
    }

    async fn migrate_bucket(&self, bucket: &str, destination: &Arc<dyn Store>, source: &Arc<dyn Store>) -> Result<(), MigrationError> {
        let mut iter = source
            .new_bucket_iterator(bucket)
            .await
            .map_err(|e| MigrationError::BucketIterator { bucket: bucket.to_owned(), source: e })?;

        self.watcher.migrate_bucket_did_start(bucket);

        let mut tasks = JoinSet::new();
        loop {
            let blob = match iter.next().await {
                Ok(blob) => blob,
                Err(IteratorError::EndOfIteration) => break,
                Err(IteratorError::Aborted) => break,
                Err(IteratorError::Store(source_err)) => {
                    iter.done();
                    return Err(MigrationError::Iteration { bucket: bucket.to_owned(), source: source_err });
                }
            };

            let permit = self.pool.clone().acquire_owned().await.expect("semaphore is never closed");
            let destination = destination.clone();
            let source = source.clone();
            let migrator = self.migrator.clone();
            let watcher = self.watcher.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let checksum = match source.checksum(&blob).await {
                    Ok(checksum) => checksum,
                    Err(e) => {
                        watcher.migrate_blob_did_fail_with_error(crate::error::BlobMigrationError::SourceChecksum { source: e });
                        return;
                    }
                };
                let blob = blob.assign_checksum(checksum);

                if destination.exists(&blob).await {
                    watcher.migrate_blob_already_finished();
                    return;
                }

                match migrator.migrate(&blob).await {
                    Ok(()) => watcher.migrate_blob_did_finish(),
                    Err(e) => watcher.migrate_blob_did_fail_with_error(e),
                }
            });
        }

        while tasks.join_next().await.is_some() {}
        self.watcher.migrate_bucket_did_finish(bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::StreamingBlobMigrator;
    use crate::store::MemoryStore;
    use crate::watcher::RecordingWatcher;

    fn excluded(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn happy_path_migrates_every_blob_and_reports_stats() {
        let src = Arc::new(MemoryStore::new("src"));
        src.seed("cc-buildpacks/a", b"alpha".to_vec());
        src.seed("cc-droplets/b", b"bravo".to_vec());
        let dst = Arc::new(MemoryStore::new("dst"));

        let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
        let watcher = Arc::new(RecordingWatcher::new());
        let orchestrator = BlobstoreMigrator::new(4, migrator, excluded(&[]), watcher.clone()).unwrap();

        orchestrator.migrate(dst.clone(), src.clone()).await.unwrap();

        assert!(dst.contains("cc-buildpacks/a"));
        assert!(dst.contains("cc-droplets/b"));
        let events = watcher.events.lock().unwrap();
        assert_eq!(events.first().unwrap(), "start");
        assert_eq!(events.last().unwrap(), "finish");
        assert_eq!(events.iter().filter(|e| e.as_str() == "blob_finish").count(), 2);
    }

    #[tokio::test]
    async fn already_migrated_blob_is_skipped_not_rewritten() {
        let src = Arc::new(MemoryStore::new("src"));
        src.seed("cc-packages/p", b"payload".to_vec());
        let dst = Arc::new(MemoryStore::new("dst"));
        dst.seed("cc-packages/p", b"payload".to_vec());

        let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
        let watcher = Arc::new(RecordingWatcher::new());
        let orchestrator = BlobstoreMigrator::new(2, migrator, excluded(&[]), watcher.clone()).unwrap();

        orchestrator.migrate(dst.clone(), src.clone()).await.unwrap();

        let events = watcher.events.lock().unwrap();
        assert!(events.iter().any(|e| e == "blob_skip"));
        assert!(!events.iter().any(|e| e == "blob_finish"));
    }

    #[tokio::test]
    async fn excluded_bucket_is_never_iterated() {
        let src = Arc::new(MemoryStore::new("src"));
        src.seed("cc-resources/r", b"x".to_vec());
        src.seed("cc-buildpacks/a", b"alpha".to_vec());
        let dst = Arc::new(MemoryStore::new("dst"));

        let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
        let watcher = Arc::new(RecordingWatcher::new());
        let orchestrator = BlobstoreMigrator::new(2, migrator, excluded(&["cc-resources"]), watcher.clone()).unwrap();

        orchestrator.migrate(dst.clone(), src.clone()).await.unwrap();

        assert!(dst.contains("cc-buildpacks/a"));
        assert!(!dst.contains("cc-resources/r"));
        let events = watcher.events.lock().unwrap();
        assert!(!events.iter().any(|e| e.contains("cc-resources")));
    }

    #[tokio::test]
    async fn zero_capacity_pool_is_rejected_at_construction() {
        let src = Arc::new(MemoryStore::new("src"));
        let dst = Arc::new(MemoryStore::new("dst"));
        let migrator = Arc::new(StreamingBlobMigrator::new(dst, src));
        let watcher = Arc::new(RecordingWatcher::new());
        assert!(BlobstoreMigrator::new(0, migrator, excluded(&[]), watcher).is_err());
    }

    #[tokio::test]
    async fn missing_bucket_on_source_aborts_with_fatal_error() {
        use crate::error::StoreError;
        use crate::store::{BlobReader, BucketIterator};
        use async_trait::async_trait;

        #[derive(Debug)]
        struct AlwaysMissing;

        #[async_trait]
        impl Store for AlwaysMissing {
            fn name(&self) -> &str {
                "always-missing"
            }
            async fn list(&self) -> Result<Vec<crate::blob::Blob>, StoreError> {
                Ok(Vec::new())
            }
            async fn new_bucket_iterator(&self, bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError> {
                Err(StoreError::BucketMissing(bucket.to_owned()))
            }
            async fn read(&self, _blob: &crate::blob::Blob) -> Result<BlobReader, StoreError> {
                unreachable!()
            }
            async fn write(&self, _blob: &crate::blob::Blob, _reader: BlobReader) -> Result<(), StoreError> {
                unreachable!()
            }
            async fn checksum(&self, _blob: &crate::blob::Blob) -> Result<String, StoreError> {
                unreachable!()
            }
        }

        let src = Arc::new(AlwaysMissing);
        let dst = Arc::new(MemoryStore::new("dst"));
        let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
        let watcher = Arc::new(RecordingWatcher::new());
        let orchestrator = BlobstoreMigrator::new(2, migrator, excluded(&[]), watcher).unwrap();

        let err = orchestrator.migrate(dst, src).await.unwrap_err();
        assert!(matches!(err, MigrationError::BucketIterator { bucket, .. } if bucket == "cc-buildpacks"));
    }
}
