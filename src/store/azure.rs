//! Azure Blob destination store.

use std::collections::HashMap;

use async_trait::async_trait;
use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::{BlobServiceClient, ContainerClient};
use futures::StreamExt;
use tokio::io::AsyncReadExt;

use crate::blob::Blob;
use crate::checksum;
use crate::error::StoreError;

use super::channel_iterator::channel;
use super::{split_path, BlobReader, BucketIterator, Store};

const CHECKSUM_METADATA_KEY: &str = "checksum";

#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub account: String,
    pub account_key: String,
    pub container_names: HashMap<String, String>,
}

#[derive(Debug)]
pub struct AzureStore {
    service: BlobServiceClient,
    cfg: AzureConfig,
}

impl AzureStore {
    pub fn new(cfg: AzureConfig) -> Self {
        let credentials = StorageCredentials::access_key(cfg.account.clone(), cfg.account_key.clone());
        let service = BlobServiceClient::new(cfg.account.clone(), credentials);
        Self { service, cfg }
    }

    fn physical_container(&self, logical_bucket: &str) -> String {
        self.cfg.container_names.get(logical_bucket).cloned().unwrap_or_else(|| logical_bucket.to_owned())
    }

    fn container_and_key(&self, blob: &Blob) -> (ContainerClient, String) {
        let (logical, key) = split_path(&blob.path);
        let container = self.physical_container(logical);
        (self.service.container_client(container), key.to_owned())
    }

    async fn ensure_container(&self, container: &ContainerClient) -> Result<(), StoreError> {
        if container.exists().await.map_err(|e| StoreError::Backend(e.into()))? {
            return Ok(());
        }
        container.create().await.map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl Store for AzureStore {
    fn name(&self) -> &str {
        "azure blob store"
    }

    async fn list(&self) -> Result<Vec<Blob>, StoreError> {
        let mut blobs = Vec::new();
        for logical_bucket in crate::blob::LOGICAL_BUCKETS {
            let container = self.service.container_client(self.physical_container(logical_bucket));
            if !container.exists().await.map_err(|e| StoreError::Backend(e.into()))? {
                continue;
            }
            let mut stream = container.list_blobs().into_stream();
            while let Some(page) = stream.next().await {
                let page = page.map_err(|e| StoreError::Backend(e.into()))?;
                for item in page.blobs.blobs() {
                    let path = format!("{logical_bucket}/{}", item.name);
                    let checksum = item.properties.content_md5.as_ref().map(|md5| hex_simd::encode_to_string(md5.as_slice(), hex_simd::AsciiCase::Lower)).unwrap_or_default();
                    blobs.push(Blob::with_checksum(path, checksum));
                }
            }
        }
        Ok(blobs)
    }

    async fn new_bucket_iterator(&self, logical_bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError> {
        let container = self.service.container_client(self.physical_container(logical_bucket));
        if !container.exists().await.map_err(|e| StoreError::Backend(e.into()))? {
            return Err(StoreError::BucketMissing(logical_bucket.to_owned()));
        }

        let (tx, rx) = channel();
        let cancel = rx.cancel_flag();
        let logical_bucket = logical_bucket.to_owned();

        tokio::spawn(async move {
            let mut stream = container.list_blobs().into_stream();
            while let Some(page) = stream.next().await {
                if cancel.is_cancelled() {
                    return;
                }
                let page = match page {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "azure listing error");
                        tx.fail(StoreError::Backend(e.into()));
                        return;
                    }
                };
                for item in page.blobs.blobs() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let path = format!("{logical_bucket}/{}", item.name);
                    if tx.send(Blob::new(path)).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::new(rx))
    }

    async fn read(&self, blob: &Blob) -> Result<BlobReader, StoreError> {
        let (container, key) = self.container_and_key(blob);
        let blob_client = container.blob_client(key);
        let mut stream = blob_client.get().into_stream();
        let (tx, rx) = tokio::io::duplex(64 * 1024);
        let mut writer = tx;
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(_) => return,
                };
                let Ok(data) = chunk.data.collect().await else { return };
                if writer.write_all(&data).await.is_err() {
                    return;
                }
            }
        });
        Ok(Box::pin(rx))
    }

    #[tracing::instrument(level = "debug", skip(self, reader))]
    async fn write(&self, blob: &Blob, mut reader: BlobReader) -> Result<(), StoreError> {
        let (container, key) = self.container_and_key(blob);
        self.ensure_container(&container).await?;

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.map_err(StoreError::Io)?;

        let blob_client = container.blob_client(key);
        let mut builder = blob_client.put_block_blob(buf);
        builder = builder.metadata(azure_storage::prelude::Metadata::from_iter([(CHECKSUM_METADATA_KEY.to_owned(), blob.checksum.clone())]));
        builder.await.map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn checksum(&self, blob: &Blob) -> Result<String, StoreError> {
        let (container, key) = self.container_and_key(blob);
        let blob_client = container.blob_client(key);
        let properties = blob_client.get_properties().await.map_err(|e| StoreError::Backend(e.into()))?;
        if let Some(checksum) = properties.blob.metadata.as_ref().and_then(|m| m.get(CHECKSUM_METADATA_KEY)) {
            if !checksum.is_empty() {
                return Ok(checksum.clone());
            }
        }

        // Large blobs may not carry Content-MD5 metadata; fall back to streaming the bytes.
        let reader = self.read(blob).await?;
        checksum::md5_hex_reader(reader).await.map_err(StoreError::Io)
    }
}
