use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use tokio::io::AsyncReadExt;

use crate::blob::Blob;
use crate::checksum;
use crate::error::StoreError;

use super::channel_iterator::channel;
use super::{split_path, BlobReader, BucketIterator, ChecksumMode, Store};

const CHECKSUM_METADATA_KEY: &str = "checksum";

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub disable_ssl: bool,
    pub insecure_skip_verify: bool,
    pub use_multipart_uploads: bool,
    pub checksum_mode: ChecksumMode,
    pub bucket_names: HashMap<String, String>,
}

#[derive(Debug)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    cfg: S3Config,
}

impl S3Store {
    pub async fn new(cfg: S3Config) -> Self {
        let scheme = if cfg.disable_ssl { "http" } else { "https" };
        let endpoint = if cfg.endpoint.contains("://") { cfg.endpoint.clone() } else { format!("{scheme}://{}", cfg.endpoint) };

        let credentials = aws_sdk_s3::config::Credentials::new(&cfg.access_key, &cfg.secret_key, None, None, "blobmover");

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::v2023_11_09())
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self { client: aws_sdk_s3::Client::from_conf(config), cfg }
    }

    fn physical_bucket(&self, logical_bucket: &str) -> String {
        self.cfg.bucket_names.get(logical_bucket).cloned().unwrap_or_else(|| logical_bucket.to_owned())
    }

    fn bucket_and_key(&self, blob: &Blob) -> (String, String) {
        let (logical, key) = split_path(&blob.path);
        (self.physical_bucket(logical), key.to_owned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn bucket_exists(&self, physical_bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(physical_bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().and_then(|e| e.meta().code()).map(|c| c == "NotFound" || c == "404") == Some(true) {
                    Ok(false)
                } else {
                    Err(StoreError::Backend(err.into()))
                }
            }
        }
    }

    async fn create_bucket_if_missing(&self, physical_bucket: &str) -> Result<(), StoreError> {
        if self.bucket_exists(physical_bucket).await? {
            return Ok(());
        }
        self.client
            .create_bucket()
            .bucket(physical_bucket)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn checksum_from_etag(&self, physical_bucket: &str, key: &str) -> Result<String, StoreError> {
        let head = self
            .client
            .head_object()
            .bucket(physical_bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        let etag = head.e_tag().ok_or_else(|| StoreError::ChecksumUnavailable(key.to_owned()))?;
        Ok(etag.trim_matches('"').to_owned())
    }

    async fn checksum_from_metadata(&self, physical_bucket: &str, key: &str) -> Result<Option<String>, StoreError> {
        let head = self
            .client
            .head_object()
            .bucket(physical_bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(head.metadata().and_then(|m| m.get(CHECKSUM_METADATA_KEY)).cloned())
    }

    async fn checksum_from_stream(&self, physical_bucket: &str, key: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(physical_bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        let reader = output.body.into_async_read();
        checksum::md5_hex_reader(reader).await.map_err(StoreError::Io)
    }
}

#[async_trait]
impl Store for S3Store {
    fn name(&self) -> &str {
        "S3"
    }

    async fn list(&self) -> Result<Vec<Blob>, StoreError> {
        let mut blobs = Vec::new();
        for logical_bucket in crate::blob::LOGICAL_BUCKETS {
            let physical = self.physical_bucket(logical_bucket);
            if !self.bucket_exists(&physical).await? {
                continue;
            }
            let mut continuation: Option<String> = None;
            loop {
                let mut req = self.client.list_objects_v2().bucket(&physical);
                if let Some(token) = &continuation {
                    req = req.continuation_token(token);
                }
                let output = req.send().await.map_err(|e| StoreError::Backend(e.into()))?;
                for object in output.contents() {
                    if let Some(key) = object.key() {
                        let path = format!("{logical_bucket}/{key}");
                        let checksum = self.checksum_from_metadata(&physical, key).await?.unwrap_or_default();
                        blobs.push(Blob::with_checksum(path, checksum));
                    }
                }
                if output.is_truncated() == Some(true) {
                    continuation = output.next_continuation_token().map(|s| s.to_owned());
                } else {
                    break;
                }
            }
        }
        Ok(blobs)
    }

    async fn new_bucket_iterator(&self, logical_bucket: &str) -> Result<Box<dyn BucketIterator>, StoreError> {
        let physical = self.physical_bucket(logical_bucket);
        if !self.bucket_exists(&physical).await? {
            return Err(StoreError::BucketMissing(physical));
        }

        let (tx, rx) = channel();
        let cancel = rx.cancel_flag();
        let client = self.client.clone();
        let logical_bucket = logical_bucket.to_owned();

        tokio::spawn(async move {
            let mut continuation: Option<String> = None;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let mut req = client.list_objects_v2().bucket(&physical);
                if let Some(token) = &continuation {
                    req = req.continuation_token(token);
                }
                let output = match req.send().await {
                    Ok(o) => o,
                    Err(e) => {
                        tracing::warn!(error = %e, "s3 listing error");
                        tx.fail(StoreError::Backend(e.into()));
                        return;
                    }
                };
                for object in output.contents() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if let Some(key) = object.key() {
                        let path = format!("{logical_bucket}/{key}");
                        if tx.send(Blob::new(path)).await.is_err() {
                            return;
                        }
                    }
                }
                if output.is_truncated() == Some(true) {
                    continuation = output.next_continuation_token().map(|s| s.to_owned());
                } else {
                    return;
                }
            }
        });

        Ok(Box::new(rx))
    }

    async fn read(&self, blob: &Blob) -> Result<BlobReader, StoreError> {
        let (bucket, key) = self.bucket_and_key(blob);
        let output = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    #[tracing::instrument(level = "debug", skip(self, reader))]
    async fn write(&self, blob: &Blob, mut reader: BlobReader) -> Result<(), StoreError> {
        let (bucket, key) = self.bucket_and_key(blob);
        self.create_bucket_if_missing(&bucket).await?;

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.map_err(StoreError::Io)?;

        let mut metadata = HashMap::new();
        metadata.insert(CHECKSUM_METADATA_KEY.to_owned(), blob.checksum.clone());

        if self.cfg.use_multipart_uploads {
            write_multipart(&self.client, &bucket, &key, buf, metadata).await
        } else {
            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(ByteStream::from(buf))
                .set_metadata(Some(metadata))
                .send()
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;
            Ok(())
        }
    }

    async fn checksum(&self, blob: &Blob) -> Result<String, StoreError> {
        let (bucket, key) = self.bucket_and_key(blob);
        match self.cfg.checksum_mode {
            ChecksumMode::SinglePartEtag => self.checksum_from_etag(&bucket, &key).await,
            ChecksumMode::StreamHash => {
                if let Some(checksum) = self.checksum_from_metadata(&bucket, &key).await? {
                    if !checksum.is_empty() {
                        return Ok(checksum);
                    }
                }
                self.checksum_from_stream(&bucket, &key).await
            }
        }
    }
}

const MULTIPART_PART_SIZE: usize = 10 * 1024 * 1024;

async fn write_multipart(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    data: Vec<u8>,
    metadata: HashMap<String, String>,
) -> Result<(), StoreError> {
    if data.len() <= MULTIPART_PART_SIZE {
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        return Ok(());
    }

    let create = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .set_metadata(Some(metadata))
        .send()
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
    let upload_id = create.upload_id().ok_or_else(|| StoreError::Backend(anyhow::anyhow!("no upload id returned")))?;

    let mut completed_parts = Vec::new();
    for (idx, chunk) in data.chunks(MULTIPART_PART_SIZE).enumerate() {
        let part_number = (idx + 1) as i32;
        let upload = client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(chunk.to_vec()))
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        let etag = upload.e_tag().unwrap_or_default().to_owned();
        completed_parts.push(
            aws_sdk_s3::types::CompletedPart::builder()
                .part_number(part_number)
                .e_tag(etag)
                .build(),
        );
    }

    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .multipart_upload(aws_sdk_s3::types::CompletedMultipartUpload::builder().set_parts(Some(completed_parts)).build())
        .send()
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
    Ok(())
}
