// ABOUTME: Independent read-back of an uploaded artifact before anything destructive runs
// ABOUTME: Never errors; any doubt is reported as "not verified"

use crate::storage::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verification {
    pub exists: bool,
    pub size_bytes: u64,
}

impl Verification {
    /// True only when the object exists and is non-empty. This is the purge gate.
    pub fn verified(&self) -> bool {
        self.exists && self.size_bytes > 0
    }
}

/// Ask the store for the size of `bucket/key`.
///
/// Absence, a zero size and API errors all yield an unverified result.
pub async fn verify(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    expected_size: u64,
) -> Verification {
    match store.object_size(bucket, key).await {
        Ok(Some(size_bytes)) => {
            if size_bytes != expected_size {
                tracing::warn!(
                    bucket,
                    key,
                    remote_size = size_bytes,
                    local_size = expected_size,
                    "Remote object size differs from local artifact"
                );
            }
            let verification = Verification {
                exists: true,
                size_bytes,
            };
            if verification.verified() {
                tracing::info!(bucket, key, size = size_bytes, "Upload verified");
            } else {
                tracing::error!(bucket, key, "Uploaded object is empty");
            }
            verification
        }
        Ok(None) => {
            tracing::error!(bucket, key, "Uploaded object not found");
            Verification::default()
        }
        Err(err) => {
            tracing::error!(bucket, key, error = %format!("{:#}", err), "Verification request failed");
            Verification::default()
        }
    }
}
