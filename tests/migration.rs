//! End-to-end scenarios from the migration engine's testable-properties list:
//! happy path, idempotent rerun, checksum mismatch, bucket exclusion, a fatal
//! iterator-construction failure, and skipping the NFS probe file.

use std::collections::HashSet;
use std::sync::Arc;

use blobmover::migrator::StreamingBlobMigrator;
use blobmover::orchestrator::BlobstoreMigrator;
use blobmover::store::{FilesystemStore, MemoryStore, Store};
use blobmover::watcher::{NullWatcher, RecordingWatcher};

fn no_exclusions() -> HashSet<String> {
    HashSet::new()
}

#[tokio::test]
async fn happy_path_moves_every_blob_across_all_buckets() {
    let src = Arc::new(MemoryStore::new("src"));
    src.seed("cc-buildpacks/a", b"alpha".to_vec());
    src.seed("cc-droplets/b", b"bravo".to_vec());
    src.seed("cc-packages/c", b"charlie".to_vec());
    src.seed("cc-resources/d", b"delta".to_vec());
    let dst = Arc::new(MemoryStore::new("dst"));

    let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
    let watcher = Arc::new(NullWatcher::new());
    let orchestrator = BlobstoreMigrator::new(8, migrator, no_exclusions(), watcher.clone()).unwrap();

    orchestrator.migrate(dst.clone(), src.clone()).await.unwrap();

    for path in ["cc-buildpacks/a", "cc-droplets/b", "cc-packages/c", "cc-resources/d"] {
        assert!(dst.contains(path), "{path} should have been migrated");
    }
    let stats = watcher.stats();
    assert_eq!(stats.migrated, 4);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn rerunning_a_completed_migration_skips_every_blob() {
    let src = Arc::new(MemoryStore::new("src"));
    src.seed("cc-buildpacks/a", b"alpha".to_vec());
    src.seed("cc-droplets/b", b"bravo".to_vec());
    let dst = Arc::new(MemoryStore::new("dst"));

    let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
    BlobstoreMigrator::new(4, migrator.clone(), no_exclusions(), Arc::new(NullWatcher::new()))
        .unwrap()
        .migrate(dst.clone(), src.clone())
        .await
        .unwrap();

    let watcher = Arc::new(NullWatcher::new());
    BlobstoreMigrator::new(4, migrator, no_exclusions(), watcher.clone())
        .unwrap()
        .migrate(dst, src)
        .await
        .unwrap();

    let stats = watcher.stats();
    assert_eq!(stats.migrated, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.skipped, 2);
}

#[tokio::test]
async fn checksum_mismatch_is_reported_as_a_per_blob_failure_not_a_fatal_error() {
    use blobmover::store::MismatchingChecksumStore;

    let src = Arc::new(MemoryStore::new("src"));
    src.seed("cc-droplets/x", b"bytes".to_vec());
    let dst = Arc::new(MismatchingChecksumStore { inner: MemoryStore::new("dst"), reported_checksum: "deadbeef".into() });

    let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
    let watcher = Arc::new(RecordingWatcher::new());
    let orchestrator = BlobstoreMigrator::new(2, migrator, no_exclusions(), watcher.clone()).unwrap();

    orchestrator.migrate(dst, src).await.unwrap();

    let events = watcher.events.lock().unwrap();
    assert!(events.iter().any(|e| e == "blob_fail"));
    assert!(events.last().unwrap() == "finish");
}

#[tokio::test]
async fn excluded_bucket_is_left_entirely_unmigrated() {
    let src = Arc::new(MemoryStore::new("src"));
    src.seed("cc-buildpacks/a", b"alpha".to_vec());
    src.seed("cc-resources/keepme", b"untouched".to_vec());
    let dst = Arc::new(MemoryStore::new("dst"));

    let exclude: HashSet<String> = ["cc-resources".to_string()].into_iter().collect();
    let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone(), src.clone()));
    let watcher = Arc::new(NullWatcher::new());
    let orchestrator = BlobstoreMigrator::new(4, migrator, exclude, watcher.clone()).unwrap();

    orchestrator.migrate(dst.clone(), src.clone()).await.unwrap();

    assert!(dst.contains("cc-buildpacks/a"));
    assert!(!dst.contains("cc-resources/keepme"));
    assert_eq!(watcher.stats().migrated, 1);
}

#[tokio::test]
async fn filesystem_source_skips_nfs_probe_files_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let bucket_dir = dir.path().join("cc-packages/nested");
    tokio::fs::create_dir_all(&bucket_dir).await.unwrap();
    tokio::fs::write(bucket_dir.join("real-object"), b"payload").await.unwrap();
    tokio::fs::write(bucket_dir.join(".nfs_test"), b"probe").await.unwrap();

    let src = Arc::new(FilesystemStore::new(dir.path().to_path_buf()));
    let dst = Arc::new(MemoryStore::new("dst"));

    let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone() as Arc<dyn Store>, src.clone() as Arc<dyn Store>));
    let watcher = Arc::new(NullWatcher::new());
    let orchestrator = BlobstoreMigrator::new(4, migrator, no_exclusions(), watcher.clone()).unwrap();

    orchestrator.migrate(dst.clone(), src).await.unwrap();

    assert!(dst.contains("cc-packages/nested/real-object"));
    assert_eq!(watcher.stats().migrated, 1);
}

#[tokio::test]
async fn iterator_construction_failure_aborts_the_whole_migration() {
    use async_trait::async_trait;
    use blobmover::blob::Blob;
    use blobmover::error::StoreError;
    use blobmover::orchestrator::BlobstoreMigrator;
    use blobmover::store::BlobReader;
    use blobmover::store::BucketIterator;

    #[derive(Debug)]
    struct BrokenSource;

    #[async_trait]
    impl Store for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }
        async fn list(&self) -> Result<Vec<Blob>, StoreError> {
            Ok(Vec::new())
        }
        async fn new_bucket_iterator(&self, _bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("disk offline")))
        }
        async fn read(&self, _blob: &Blob) -> Result<BlobReader, StoreError> {
            unreachable!()
        }
        async fn write(&self, _blob: &Blob, _reader: BlobReader) -> Result<(), StoreError> {
            unreachable!()
        }
        async fn checksum(&self, _blob: &Blob) -> Result<String, StoreError> {
            unreachable!()
        }
    }

    let src = Arc::new(BrokenSource);
    let dst = Arc::new(MemoryStore::new("dst"));
    let migrator = Arc::new(StreamingBlobMigrator::new(dst.clone() as Arc<dyn Store>, src.clone() as Arc<dyn Store>));
    let orchestrator = BlobstoreMigrator::new(2, migrator, no_exclusions(), Arc::new(NullWatcher::new())).unwrap();

    let err = orchestrator.migrate(dst, src).await.unwrap_err();
    assert!(err.to_string().contains("could not create bucket iterator"));
}
