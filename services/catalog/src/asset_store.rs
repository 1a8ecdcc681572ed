use crate::config::S3Config;
use crate::keys::StoragePath;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors reported by the poster asset store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object already exists: {0}")]
    Conflict(String),

    #[error("Asset store request failed: {0}")]
    Transport(String),

    #[error("Refusing to touch {path}: outside poster bucket {expected}")]
    ForeignBucket { path: StoragePath, expected: String },
}

impl StoreError {
    fn transport<E>(error: E) -> Self
    where
        E: std::error::Error,
    {
        StoreError::Transport(DisplayErrorContext(&error).to_string())
    }
}

/// Binary object store holding poster images
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Write a blob under `key`, failing with `Conflict` if the key is taken
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Public URL under which `key` can be fetched
    fn public_url_for(&self, key: &str) -> String;

    /// Remove an object; removing a missing object is not an error
    async fn remove(&self, path: &StoragePath) -> Result<(), StoreError>;

    /// Every object currently held in the poster bucket
    async fn list(&self) -> Result<Vec<StoragePath>, StoreError>;
}

/// S3-compatible poster store
pub struct S3AssetStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3AssetStore {
    /// Create a new S3 asset store
    pub async fn new(config: &S3Config) -> Result<Self> {
        config.validate()?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/Supabase storage
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            public_base_url = %config.public_base_url,
            "S3 asset store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Single-part conditional write; the store rejects the write if the key exists
    async fn simple_put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| {
                let code = e.as_service_error().and_then(|se| se.code());
                if code == Some("PreconditionFailed") {
                    StoreError::Conflict(key.to_string())
                } else {
                    StoreError::transport(e)
                }
            })?;

        Ok(())
    }

    /// Multipart upload for large posters, aborted on any failed part
    async fn multipart_put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError> {
        if self.exists(key).await? {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(StoreError::transport)?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::Transport("No upload ID in response".to_string()))?;

        match self.upload_parts(key, upload_id, bytes).await {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map_err(StoreError::transport)?;

                Ok(())
            }
            Err(e) => {
                if let Err(abort_error) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = %key,
                        error = %DisplayErrorContext(&abort_error),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        bytes: &[u8],
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(StoreError::transport)?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }

    /// Check if an object exists in the poster bucket
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StoreError::transport(e))
                }
            }
        }
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let content_type = content_type_for_key(key);
        let size_bytes = bytes.len();

        if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_put(key, &bytes, content_type).await?;
        } else {
            self.simple_put(key, bytes, content_type).await?;
        }

        info!(bucket = %self.bucket, size_bytes, "Poster uploaded");
        metrics::counter!("catalog.assets.uploaded").increment(1);

        Ok(())
    }

    fn public_url_for(&self, key: &str) -> String {
        public_url(&self.config.public_base_url, &self.bucket, key)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn remove(&self, path: &StoragePath) -> Result<(), StoreError> {
        ensure_poster_bucket(&self.bucket, path).map_err(|e| {
            warn!(expected = %self.bucket, "Refusing to remove object outside the poster bucket");
            e
        })?;

        // S3 answers 204 for missing keys, so this is idempotent
        self.client
            .delete_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(StoreError::transport)?;

        debug!("Poster deleted");
        metrics::counter!("catalog.assets.deleted").increment(1);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<StoragePath>, StoreError> {
        let mut paths = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(StoreError::transport)?;

            paths.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|key| StoragePath::new(self.bucket.as_str(), key)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(bucket = %self.bucket, count = paths.len(), "Listed poster objects");
        Ok(paths)
    }
}

/// Only objects in the configured poster bucket may be removed
fn ensure_poster_bucket(expected: &str, path: &StoragePath) -> Result<(), StoreError> {
    if path.bucket == expected {
        Ok(())
    } else {
        Err(StoreError::ForeignBucket {
            path: path.clone(),
            expected: expected.to_string(),
        })
    }
}

/// `{base}/public/{bucket}/{key}`
fn public_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/public/{}/{}", base.trim_end_matches('/'), bucket, key)
}

/// Get content type for a poster key from its extension
fn content_type_for_key(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();

    match ext.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}
