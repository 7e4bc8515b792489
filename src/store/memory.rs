//! An in-memory fake store used by unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::blob::Blob;
use crate::checksum;
use crate::error::StoreError;

use super::channel_iterator::{channel, EmptyBucketIterator};
use super::{BlobReader, BucketIterator, Store};

#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), objects: Mutex::new(HashMap::new()) }
    }

    /// Seeds an object directly, as test fixtures commonly need to.
    pub fn seed(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(path.into(), bytes.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    pub fn bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Result<Vec<Blob>, StoreError> {
        let mut blobs = Vec::new();
        let snapshot: Vec<(String, Vec<u8>)> = self.objects.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (path, bytes) in snapshot {
            let checksum = checksum::md5_hex_bytes(&bytes);
            blobs.push(Blob::with_checksum(path, checksum));
        }
        Ok(blobs)
    }

    async fn new_bucket_iterator(&self, logical_bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError> {
        let paths: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|path| path.starts_with(&format!("{logical_bucket}/")))
            .cloned()
            .collect();

        if paths.is_empty() {
            return Ok(Box::new(EmptyBucketIterator));
        }

        let (tx, rx) = channel();
        tokio::spawn(async move {
            for path in paths {
                if tx.send(Blob::new(path)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Box::new(rx))
    }

    async fn read(&self, blob: &Blob) -> Result<BlobReader, StoreError> {
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(&blob.path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(blob.path.clone()))?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn write(&self, blob: &Blob, mut reader: BlobReader) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.map_err(StoreError::Io)?;
        self.objects.lock().unwrap().insert(blob.path.clone(), buf);
        Ok(())
    }

    async fn checksum(&self, blob: &Blob) -> Result<String, StoreError> {
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(&blob.path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(blob.path.clone()))?;
        Ok(checksum::md5_hex_bytes(&bytes))
    }
}

/// A `MemoryStore` wrapper that reports a checksum different from the bytes it
/// actually stores, for exercising the checksum-mismatch failure path.
#[derive(Debug)]
pub struct MismatchingChecksumStore {
    pub inner: MemoryStore,
    pub reported_checksum: String,
}

#[async_trait]
impl Store for MismatchingChecksumStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list(&self) -> Result<Vec<Blob>, StoreError> {
        self.inner.list().await
    }

    async fn new_bucket_iterator(&self, logical_bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError> {
        self.inner.new_bucket_iterator(logical_bucket).await
    }

    async fn read(&self, blob: &Blob) -> Result<BlobReader, StoreError> {
        self.inner.read(blob).await
    }

    async fn write(&self, blob: &Blob, reader: BlobReader) -> Result<(), StoreError> {
        self.inner.write(blob, reader).await
    }

    async fn checksum(&self, _blob: &Blob) -> Result<String, StoreError> {
        Ok(self.reported_checksum.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IteratorError;

    #[tokio::test]
    async fn seeded_blob_round_trips() {
        let store = MemoryStore::new("mem");
        store.seed("cc-buildpacks/aa/bb", b"some content".to_vec());

        let blob = Blob::with_checksum("cc-buildpacks/aa/bb", "d8e8fca2dc0f896fd7cb4cb0031ba249");
        assert_eq!(store.checksum(&blob).await.unwrap(), blob.checksum);
        assert!(store.exists(&blob).await);
    }

    #[tokio::test]
    async fn iterator_is_sticky_after_exhaustion() {
        let store = MemoryStore::new("mem");
        store.seed("cc-droplets/a", b"a".to_vec());
        let mut iter = store.new_bucket_iterator("cc-droplets").await.unwrap();
        assert!(iter.next().await.is_ok());
        assert!(matches!(iter.next().await, Err(IteratorError::EndOfIteration)));
        assert!(matches!(iter.next().await, Err(IteratorError::EndOfIteration)));
    }
}
