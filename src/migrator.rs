//! Atomic per-blob transfer: read from source, write to destination, verify.

use std::sync::Arc;

use async_trait::async_trait;

use crate::blob::Blob;
use crate::error::BlobMigrationError;
use crate::store::Store;

#[async_trait]
pub trait BlobMigrator: Send + Sync {
    async fn migrate(&self, blob: &Blob) -> Result<(), BlobMigrationError>;
}

pub struct StreamingBlobMigrator {
    dst: Arc<dyn Store>,
    src: Arc<dyn Store>,
}

impl StreamingBlobMigrator {
    pub fn new(dst: Arc<dyn Store>, src: Arc<dyn Store>) -> Self {
        Self { dst, src }
    }
}

#[async_trait]
impl BlobMigrator for StreamingBlobMigrator {
    #[tracing::instrument(level = "debug", skip(self), fields(path = %blob.path))]
    async fn migrate(&self, blob: &Blob) -> Result<(), BlobMigrationError> {
        let reader = self.src.read(blob).await.map_err(|e| BlobMigrationError::for_blob(blob).read(e))?;

        self.dst.write(blob, reader).await.map_err(|e| BlobMigrationError::for_blob(blob).write(e))?;

        let checksum = self.dst.checksum(blob).await.map_err(|e| BlobMigrationError::for_blob(blob).checksum(e))?;

        if checksum != blob.checksum {
            return Err(BlobMigrationError::for_blob(blob).mismatch(checksum, blob.checksum.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MismatchingChecksumStore};

    #[tokio::test]
    async fn happy_path_migrates_and_verifies() {
        let src = Arc::new(MemoryStore::new("src"));
        src.seed("cc-buildpacks/aa/bb/file", b"some content".to_vec());
        let dst = Arc::new(MemoryStore::new("dst"));

        let blob = Blob::with_checksum("cc-buildpacks/aa/bb/file", "d8e8fca2dc0f896fd7cb4cb0031ba249");
        let migrator = StreamingBlobMigrator::new(dst.clone(), src.clone());
        migrator.migrate(&blob).await.unwrap();

        assert_eq!(dst.bytes("cc-buildpacks/aa/bb/file").unwrap(), b"some content");
    }

    #[tokio::test]
    async fn checksum_mismatch_is_reported_with_canonical_message() {
        let src = Arc::new(MemoryStore::new("src"));
        src.seed("cc-droplets/x", b"bytes".to_vec());
        let dst = Arc::new(MismatchingChecksumStore { inner: MemoryStore::new("dst"), reported_checksum: "deadbeef".into() });

        let blob = Blob::with_checksum("cc-droplets/x", "expected000");
        let migrator = StreamingBlobMigrator::new(dst, src);
        let err = migrator.migrate(&blob).await.unwrap_err();

        assert_eq!(err.to_string(), "error at cc-droplets/x: checksum [deadbeef] does not match [expected000]");
    }

    #[tokio::test]
    async fn missing_source_object_fails_at_read() {
        let src = Arc::new(MemoryStore::new("src"));
        let dst = Arc::new(MemoryStore::new("dst"));
        let blob = Blob::with_checksum("cc-packages/missing", "anything");
        let migrator = StreamingBlobMigrator::new(dst, src);
        let err = migrator.migrate(&blob).await.unwrap_err();
        assert!(err.to_string().starts_with("error at cc-packages/missing:"));
    }
}
