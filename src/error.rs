// ABOUTME: Error taxonomy for backup jobs
// ABOUTME: Each variant names the stage that failed so job reports stay actionable

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection profile '{0}' not found. Check the connectionName entries under dbConfig")]
    ConnectionNotFound(String),

    #[error("Refusing to run without a scope: {0}")]
    Unscoped(String),

    #[error("Dump failed: {0}")]
    Dump(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Purge failed after deleting {deleted} rows: {message}")]
    Purge { deleted: u64, message: String },
}

impl ArchiverError {
    /// Flatten an anyhow chain into a single-line message, keeping every cause.
    pub fn dump(err: anyhow::Error) -> Self {
        ArchiverError::Dump(format!("{:#}", err))
    }

    pub fn upload(err: anyhow::Error) -> Self {
        ArchiverError::Upload(format!("{:#}", err))
    }
}
