// ABOUTME: Pushes a local artifact to object storage under a date-partitioned key
// ABOUTME: Key layout is {remote_dir}/{YYYYMM}/{YYYYMMDD}/{file_name}

use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Local};

use crate::dump::ArtifactHandle;
use crate::error::ArchiverError;
use crate::storage::ObjectStore;

pub fn remote_key(remote_dir: &str, started_at: &DateTime<Local>, file_name: &str) -> String {
    let partition = format!(
        "{}/{}",
        started_at.format("%Y%m"),
        started_at.format("%Y%m%d")
    );
    let prefix = remote_dir.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", partition, file_name)
    } else {
        format!("{}/{}/{}", prefix, partition, file_name)
    }
}

pub async fn upload(
    store: &dyn ObjectStore,
    mut artifact: ArtifactHandle,
    bucket: &str,
    remote_dir: &str,
    started_at: &DateTime<Local>,
) -> Result<ArtifactHandle, ArchiverError> {
    let key = remote_key(remote_dir, started_at, &artifact.file_name);
    let metadata = HashMap::from([("sha256".to_string(), artifact.sha256.clone())]);

    tracing::info!(
        bucket,
        key = %key,
        size = artifact.local_size,
        "Uploading artifact"
    );

    store
        .put_file(bucket, &key, &artifact.local_path, &metadata)
        .await
        .with_context(|| {
            format!(
                "Failed to upload {} to s3://{}/{}",
                artifact.local_path.display(),
                bucket,
                key
            )
        })
        .map_err(ArchiverError::upload)?;

    tracing::info!(bucket, key = %key, "Upload finished");
    artifact.remote_key = Some(key);
    Ok(artifact)
}
