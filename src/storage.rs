// ABOUTME: Object storage seam (put a file, read back its size) and the S3 implementation
// ABOUTME: Large artifacts go through multipart upload; failures abort the multipart upload

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tokio::io::AsyncReadExt;

use crate::config::StorageSettings;

/// Artifacts above this size are uploaded in parts.
pub const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Part size for multipart uploads. S3 requires at least 5 MiB for all but the last part.
pub const MULTIPART_PART_SIZE: u64 = 16 * 1024 * 1024;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file to `bucket/key`, attaching user metadata.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    /// Size of `bucket/key` as reported by the store, `None` if the object does not exist.
    async fn object_size(&self, bucket: &str, key: &str) -> Result<Option<u64>>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.object_size(bucket, key).await?.is_some())
    }
}

pub struct S3Store {
    client: Client,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").finish_non_exhaustive()
    }
}

impl S3Store {
    /// Build a client from the ambient AWS configuration (env, profile, instance role),
    /// overridden by any region/endpoint given in the config file.
    pub async fn from_settings(settings: &StorageSettings) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            let lower = endpoint.to_ascii_lowercase();
            let endpoint = if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("http://{}", endpoint)
            };
            builder = builder.endpoint_url(endpoint);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to open {} for upload", path.display()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata.clone()))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "PutObject s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                )
            })?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "CreateMultipartUpload s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                )
            })?;
        let upload_id = created
            .upload_id()
            .context("S3 did not return an upload id")?
            .to_string();

        match self.upload_parts(bucket, key, &upload_id, path, size).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                let result = self
                    .client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await;
                if let Err(e) = result {
                    self.abort_multipart(bucket, key, &upload_id).await;
                    return Err(anyhow!(
                        "CompleteMultipartUpload s3://{}/{} failed: {}",
                        bucket,
                        key,
                        DisplayErrorContext(&e)
                    ));
                }
                Ok(())
            }
            Err(err) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        size: u64,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {} for upload", path.display()))?;
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let len = MULTIPART_PART_SIZE.min(size - offset);
            let mut buffer = vec![0u8; len as usize];
            file.read_exact(&mut buffer)
                .await
                .with_context(|| format!("Failed to read part {} of {}", part_number, path.display()))?;

            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| {
                    anyhow!(
                        "UploadPart {} of s3://{}/{} failed: {}",
                        part_number,
                        bucket,
                        key,
                        DisplayErrorContext(&e)
                    )
                })?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(output.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            tracing::debug!(part = part_number, bytes = len, "Uploaded part");
            offset += len;
            part_number += 1;
        }

        Ok(parts)
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                bucket,
                key,
                error = %DisplayErrorContext(&e),
                "Failed to abort multipart upload; an incomplete upload may remain in the bucket"
            );
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();

        if size > MULTIPART_THRESHOLD {
            self.put_multipart(bucket, key, path, size, metadata).await
        } else {
            self.put_single(bucket, key, path, metadata).await
        }
    }

    async fn object_size(&self, bucket: &str, key: &str) -> Result<Option<u64>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) => {
                if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
                    if service_err.raw().status().as_u16() == 404 {
                        return Ok(None);
                    }
                }
                Err(anyhow!(
                    "HeadObject s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&err)
                ))
            }
        }
    }
}
