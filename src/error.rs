use std::panic::Location;

use tracing::error;

use crate::blob::Blob;

#[track_caller]
pub fn log(source: &dyn std::error::Error) {
    let location = Location::caller();
    let span_trace = tracing_error::SpanTrace::capture();
    error!(
        target: "blobmover",
        %location,
        error = %source,
        "span trace:\n{span_trace}"
    );
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("bucket does not exist: {0}")]
    BucketMissing(String),
    #[error("object not found at {0}")]
    NotFound(String),
    #[error("checksum unavailable for {0}")]
    ChecksumUnavailable(String),
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum IteratorError {
    #[error("no more items in iterator")]
    EndOfIteration,
    #[error("iterator aborted")]
    Aborted,
    #[error("iterator error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum BlobMigrationError {
    #[error("error at {path}: {source}")]
    Read { path: String, source: StoreError },
    #[error("error at {path}: {source}")]
    Write { path: String, source: StoreError },
    #[error("error at {path}: {source}")]
    Checksum { path: String, source: StoreError },
    #[error("error at {path}: checksum [{actual}] does not match [{expected}]")]
    ChecksumMismatch { path: String, actual: String, expected: String },
    #[error("could not checksum blob: {source}")]
    SourceChecksum { source: StoreError },
}

impl BlobMigrationError {
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Read { path, .. }
            | Self::Write { path, .. }
            | Self::Checksum { path, .. }
            | Self::ChecksumMismatch { path, .. } => Some(path),
            Self::SourceChecksum { .. } => None,
        }
    }

    pub fn for_blob(blob: &Blob) -> BlobMigrationErrorBuilder<'_> {
        BlobMigrationErrorBuilder { blob }
    }
}

pub struct BlobMigrationErrorBuilder<'a> {
    blob: &'a Blob,
}

impl<'a> BlobMigrationErrorBuilder<'a> {
    pub fn read(self, source: StoreError) -> BlobMigrationError {
        BlobMigrationError::Read { path: self.blob.path.clone(), source }
    }
    pub fn write(self, source: StoreError) -> BlobMigrationError {
        BlobMigrationError::Write { path: self.blob.path.clone(), source }
    }
    pub fn checksum(self, source: StoreError) -> BlobMigrationError {
        BlobMigrationError::Checksum { path: self.blob.path.clone(), source }
    }
    pub fn mismatch(self, actual: String, expected: String) -> BlobMigrationError {
        BlobMigrationError::ChecksumMismatch { path: self.blob.path.clone(), actual, expected }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("could not create bucket iterator for bucket {bucket}: {source}")]
    BucketIterator { bucket: String, source: StoreError },
    #[error("error iterating bucket {bucket}: {source}")]
    Iteration { bucket: String, source: StoreError },
}
