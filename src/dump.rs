// ABOUTME: Builds mysqldump argument vectors and streams the dump through gzip to disk
// ABOUTME: Produces the local artifact handle (path, size, sha256) consumed by the uploader

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::config::JobSpec;
use crate::error::ArchiverError;
use crate::registry::ConnectionProfile;

pub const DUMP_PROGRAM: &str = "mysqldump";
pub const COMPRESS_PROGRAM: &str = "gzip";
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Lines of child stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpScope {
    /// No table given: every table of the database.
    Database,
    /// One table, all rows.
    Table,
    /// One table, rows matching the predicate.
    FilteredRows,
}

/// A fully built dump invocation. The password travels in `MYSQL_PWD`, not in `args`.
#[derive(Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    pub password: String,
    pub scope: DumpScope,
}

impl fmt::Debug for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("password", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

impl DumpCommand {
    pub fn for_job(job: &JobSpec, profile: &ConnectionProfile) -> Self {
        let mut args = vec![
            "--lock-tables=false".to_string(),
            "--skip-extended-insert".to_string(),
            "-t".to_string(),
            "-h".to_string(),
            profile.host.clone(),
            "-P".to_string(),
            profile.port.to_string(),
            "-u".to_string(),
            profile.username.clone(),
            "--databases".to_string(),
            job.database.clone(),
        ];

        let scope = match &job.table {
            None => DumpScope::Database,
            Some(table) => {
                args.push("--tables".to_string());
                args.push(table.clone());
                if job.has_predicate() {
                    DumpScope::FilteredRows
                } else {
                    DumpScope::Table
                }
            }
        };

        args.push("--compress".to_string());
        args.push("--verbose".to_string());
        if scope == DumpScope::FilteredRows {
            args.push(format!("--where={}", job.row_predicate));
        }

        Self {
            program: DUMP_PROGRAM.to_string(),
            args,
            password: profile.password.clone(),
            scope,
        }
    }

    /// Printable form for logs. Never contains the password.
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// The compressed dump of one job, enriched as it moves through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub local_path: PathBuf,
    pub file_name: String,
    pub local_size: u64,
    pub sha256: String,
    pub remote_key: Option<String>,
}

/// `{table}_{YYYYMMDDHHmm}.sql.gz`; whole-database dumps use the database name.
pub fn artifact_file_name(job: &JobSpec, started_at: &DateTime<Local>) -> String {
    format!(
        "{}_{}.sql.gz",
        job.artifact_stem(),
        started_at.format(ARTIFACT_TIMESTAMP_FORMAT)
    )
}

/// Runs a dump command so that its compressed output lands in `destination`.
#[async_trait]
pub trait DumpExecutor: Send + Sync {
    async fn execute(&self, command: &DumpCommand, destination: &Path) -> Result<()>;
}

/// Spawns the dump tool and pipes its stdout straight into `gzip -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessDumpExecutor;

#[async_trait]
impl DumpExecutor for ProcessDumpExecutor {
    async fn execute(&self, command: &DumpCommand, destination: &Path) -> Result<()> {
        let output_file = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("Failed to create artifact file {}", destination.display()))?
            .into_std()
            .await;

        let mut dump = Command::new(&command.program)
            .args(&command.args)
            .env("MYSQL_PWD", &command.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start {}. Make sure it is installed and on PATH",
                    command.program
                )
            })?;

        let dump_stdout: Stdio = dump
            .stdout
            .take()
            .context("Dump process stdout was not captured")?
            .try_into()
            .context("Failed to hand dump stdout to the compressor")?;

        let compressor = Command::new(COMPRESS_PROGRAM)
            .arg("-c")
            .stdin(dump_stdout)
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start {}. Make sure it is installed and on PATH",
                    COMPRESS_PROGRAM
                )
            })?;

        let (dump_output, compress_output) =
            tokio::join!(dump.wait_with_output(), compressor.wait_with_output());
        let dump_output = dump_output.context("Failed to wait for dump process")?;
        let compress_output = compress_output.context("Failed to wait for compressor")?;

        let dump_stderr = String::from_utf8_lossy(&dump_output.stderr);
        if !dump_output.status.success() {
            bail!(
                "{} exited with {}: {}",
                command.program,
                dump_output.status,
                stderr_tail(&dump_stderr)
            );
        }
        if !compress_output.status.success() {
            bail!(
                "{} exited with {}: {}",
                COMPRESS_PROGRAM,
                compress_output.status,
                stderr_tail(&String::from_utf8_lossy(&compress_output.stderr))
            );
        }

        tracing::debug!(output = %dump_stderr.trim_end(), "Dump diagnostics");
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}

/// Dump the job's scope into `{local_output_dir}/{file_name}`.
///
/// Refuses jobs without a row predicate, and removes any partial artifact on failure.
pub async fn produce_dump(
    job: &JobSpec,
    profile: &ConnectionProfile,
    executor: &dyn DumpExecutor,
    started_at: &DateTime<Local>,
) -> Result<ArtifactHandle, ArchiverError> {
    if !job.has_predicate() {
        return Err(ArchiverError::Unscoped(format!(
            "job {} has an empty whereOperation; refusing to dump",
            job.label()
        )));
    }

    tokio::fs::create_dir_all(&job.local_output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                job.local_output_dir.display()
            )
        })
        .map_err(ArchiverError::dump)?;

    let file_name = artifact_file_name(job, started_at);
    let local_path = job.local_output_dir.join(&file_name);
    let command = DumpCommand::for_job(job, profile);

    tracing::info!(
        command = %command.display(),
        path = %local_path.display(),
        scope = ?command.scope,
        "Starting dump"
    );

    if let Err(err) = executor.execute(&command, &local_path).await {
        remove_partial(&local_path).await;
        return Err(ArchiverError::dump(err));
    }

    let local_size = tokio::fs::metadata(&local_path)
        .await
        .with_context(|| format!("Dump finished but {} is missing", local_path.display()))
        .map_err(ArchiverError::dump)?
        .len();
    let sha256 = file_sha256(&local_path).await.map_err(ArchiverError::dump)?;

    tracing::info!(
        path = %local_path.display(),
        size = local_size,
        sha256 = %sha256,
        "Dump completed"
    );

    Ok(ArtifactHandle {
        local_path,
        file_name,
        local_size,
        sha256,
        remote_key: None,
    })
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial artifact"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial artifact")
        }
    }
}

/// Hex SHA-256 of a file, computed off the async runtime.
pub async fn file_sha256(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)
            .with_context(|| format!("Failed to read {} for hashing", path.display()))?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .context("Hashing task panicked")?
}

/// External tools required by the dump stage that are not on PATH.
pub fn missing_tools() -> Vec<&'static str> {
    [DUMP_PROGRAM, COMPRESS_PROGRAM]
        .into_iter()
        .filter(|tool| which::which(tool).is_err())
        .collect()
}
