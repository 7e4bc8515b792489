mod azure;
pub(crate) mod channel_iterator;
mod filesystem;
mod memory;
mod s3;

pub use azure::{AzureConfig, AzureStore};
pub use filesystem::FilesystemStore;
pub use memory::{MemoryStore, MismatchingChecksumStore};
pub use s3::{S3Config, S3Store};

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::blob::Blob;
use crate::error::{IteratorError, StoreError};

pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    SinglePartEtag,
    StreamHash,
}

#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn list(&self) -> Result<Vec<Blob>, StoreError>;

    async fn new_bucket_iterator(&self, logical_bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError>;

    async fn read(&self, blob: &Blob) -> Result<BlobReader, StoreError>;

    async fn write(&self, blob: &Blob, reader: BlobReader) -> Result<(), StoreError>;

    async fn checksum(&self, blob: &Blob) -> Result<String, StoreError>;

    /// Total: any backend error maps to `false`, not an error.
    async fn exists(&self, blob: &Blob) -> bool {
        match self.checksum(blob).await {
            Ok(checksum) => checksum == blob.checksum,
            Err(_) => false,
        }
    }
}

/// Terminal states are sticky: once `next` has returned `EndOfIteration` or
/// `Aborted`, every subsequent call returns the same terminal error.
#[async_trait]
pub trait BucketIterator: Send {
    async fn next(&mut self) -> Result<Blob, IteratorError>;

    fn done(&mut self);
}

pub(crate) fn split_path(path: &str) -> (&str, &str) {
    match path.find('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (path, ""),
    }
}
