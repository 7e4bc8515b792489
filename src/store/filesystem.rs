//! The source store: a directory tree rooted at `<root>/<bucket>/...`. Walks
//! depth-first, skips any file literally named `.nfs_test` (an NFS probe-file
//! convention), and never implements `write` — the filesystem is read-only here.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::blob::{Blob, LOGICAL_BUCKETS};
use crate::checksum;
use crate::error::StoreError;

use super::channel_iterator::{channel, EmptyBucketIterator};
use super::{split_path, BlobReader, BucketIterator, Store};

const NFS_PROBE_FILE: &str = ".nfs_test";

#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, blob: &Blob) -> PathBuf {
        self.root.join(&blob.path)
    }
}

#[async_trait]
impl Store for FilesystemStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list(&self) -> Result<Vec<Blob>, StoreError> {
        let mut blobs = Vec::new();
        for bucket in LOGICAL_BUCKETS {
            let mut iter = self.new_bucket_iterator(bucket).await?;
            loop {
                match iter.next().await {
                    Ok(blob) => blobs.push(blob),
                    Err(crate::error::IteratorError::EndOfIteration) => break,
                    Err(crate::error::IteratorError::Aborted) => break,
                    Err(crate::error::IteratorError::Store(e)) => return Err(e),
                }
            }
        }
        for blob in blobs.iter_mut() {
            let checksum = self.checksum(blob).await?;
            blob.checksum = checksum;
        }
        Ok(blobs)
    }

    async fn new_bucket_iterator(&self, logical_bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError> {
        let bucket_root = self.root.join(logical_bucket);
        if !bucket_root.exists() {
            return Ok(Box::new(EmptyBucketIterator));
        }

        let (tx, rx) = channel();
        let bucket_name = logical_bucket.to_owned();
        let walk_root = bucket_root;
        let cancel = rx.cancel_flag();

        tokio::task::spawn_blocking(move || {
            for entry in WalkDir::new(&walk_root).into_iter() {
                if cancel.is_cancelled() {
                    return;
                }
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        let message = e.to_string();
                        tracing::warn!(error = %message, "filesystem walk error");
                        let store_err = e.into_io_error().map(StoreError::Io).unwrap_or_else(|| StoreError::Backend(anyhow::anyhow!(message)));
                        tx.fail(store_err);
                        return;
                    }
                };
                if entry.file_type().is_dir() {
                    continue;
                }
                if entry.file_name() == NFS_PROBE_FILE {
                    continue;
                }
                let relative = entry.path().strip_prefix(&walk_root).expect("entry is under walk_root");
                let path = format!("{bucket_name}/{}", relative.to_string_lossy().replace('\\', "/"));
                if tx.blocking_send(Blob::new(path)).is_err() {
                    return;
                }
            }
        });

        Ok(Box::new(rx))
    }

    async fn read(&self, blob: &Blob) -> Result<BlobReader, StoreError> {
        let path = self.resolve(blob);
        let file = tokio::fs::File::open(&path).await.map_err(StoreError::Io)?;
        Ok(Box::pin(file))
    }

    async fn write(&self, _blob: &Blob, _reader: BlobReader) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("writing to the filesystem store is not supported")))
    }

    async fn checksum(&self, blob: &Blob) -> Result<String, StoreError> {
        let path = self.resolve(blob);
        checksum::md5_hex_file(&path).await.map_err(StoreError::Io)
    }

    async fn exists(&self, blob: &Blob) -> bool {
        let path = self.resolve(blob);
        path.is_file()
    }
}

/// The filesystem's own path resolution helper, exposed for tests that need to
/// assert on the expected layout without duplicating the join logic.
pub fn object_path(root: &Path, blob: &Blob) -> PathBuf {
    let (_, key) = split_path(&blob.path);
    root.join(blob.bucket()).join(key)
}
