// ABOUTME: One job's dump -> upload -> verify -> purge sequence
// ABOUTME: Every failure is caught here and turned into a report naming the failing stage

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::config::JobSpec;
use crate::dump::{self, DumpExecutor};
use crate::error::ArchiverError;
use crate::purge::{self, PurgeConnector};
use crate::registry::ConnectionRegistry;
use crate::storage::ObjectStore;
use crate::upload;
use crate::verify::{self, Verification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    ResolveDumpConnection,
    Dump,
    Upload,
    ResolvePurgeConnection,
    Purge,
    /// The job task itself died (panic).
    Task,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::ResolveDumpConnection => "resolve-dump-connection",
            Stage::Dump => "dump",
            Stage::Upload => "upload",
            Stage::ResolvePurgeConnection => "resolve-purge-connection",
            Stage::Purge => "purge",
            Stage::Task => "task",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// `autoDelete` is off for this job.
    Disabled,
    /// Purge was requested but the upload could not be verified.
    SkippedUnverified,
    Deleted(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        remote_key: String,
        verification: Verification,
        purge: PurgeOutcome,
    },
    Aborted {
        stage: Stage,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job: String,
    pub outcome: JobOutcome,
}

impl JobReport {
    /// Completed with a verified upload and no purge left undone.
    pub fn succeeded(&self) -> bool {
        matches!(
            &self.outcome,
            JobOutcome::Completed { verification, purge, .. }
                if verification.verified() && *purge != PurgeOutcome::SkippedUnverified
        )
    }
}

type StageError = (Stage, ArchiverError);

pub struct Pipeline {
    registry: ConnectionRegistry,
    dumper: Arc<dyn DumpExecutor>,
    store: Arc<dyn ObjectStore>,
    connector: Arc<dyn PurgeConnector>,
}

impl Pipeline {
    pub fn new(
        registry: ConnectionRegistry,
        dumper: Arc<dyn DumpExecutor>,
        store: Arc<dyn ObjectStore>,
        connector: Arc<dyn PurgeConnector>,
    ) -> Self {
        Self {
            registry,
            dumper,
            store,
            connector,
        }
    }

    pub async fn run_job(&self, job: &JobSpec) -> JobReport {
        self.run_job_at(job, &Local::now()).await
    }

    /// Run the job with a fixed start time; the time names the artifact and its partitions.
    pub async fn run_job_at(&self, job: &JobSpec, started_at: &DateTime<Local>) -> JobReport {
        let outcome = match self.execute(job, started_at).await {
            Ok(outcome) => {
                tracing::info!(outcome = ?outcome, "Job finished");
                outcome
            }
            Err((stage, err)) => {
                tracing::error!(stage = %stage, error = %err, "Job aborted");
                JobOutcome::Aborted {
                    stage,
                    error: err.to_string(),
                }
            }
        };

        JobReport {
            job: job.label(),
            outcome,
        }
    }

    async fn execute(
        &self,
        job: &JobSpec,
        started_at: &DateTime<Local>,
    ) -> Result<JobOutcome, StageError> {
        if !job.has_predicate() {
            return Err((
                Stage::Validate,
                ArchiverError::Unscoped(format!(
                    "job {} has an empty whereOperation",
                    job.label()
                )),
            ));
        }

        let dump_profile = self
            .registry
            .resolve(&job.dump_connection)
            .map_err(|e| (Stage::ResolveDumpConnection, e))?;

        let artifact = dump::produce_dump(job, dump_profile, self.dumper.as_ref(), started_at)
            .await
            .map_err(|e| (Stage::Dump, e))?;

        let artifact = upload::upload(
            self.store.as_ref(),
            artifact,
            &job.remote_bucket,
            &job.remote_dir,
            started_at,
        )
        .await
        .map_err(|e| (Stage::Upload, e))?;

        let Some(remote_key) = artifact.remote_key.clone() else {
            return Err((
                Stage::Upload,
                ArchiverError::Upload("upload returned no remote key".to_string()),
            ));
        };

        let verification = verify::verify(
            self.store.as_ref(),
            &job.remote_bucket,
            &remote_key,
            artifact.local_size,
        )
        .await;

        if !job.auto_purge {
            return Ok(JobOutcome::Completed {
                remote_key,
                verification,
                purge: PurgeOutcome::Disabled,
            });
        }

        if !verification.verified() {
            tracing::warn!(
                key = %remote_key,
                "Upload not verified, skipping purge"
            );
            return Ok(JobOutcome::Completed {
                remote_key,
                verification,
                purge: PurgeOutcome::SkippedUnverified,
            });
        }

        let purge_profile = self
            .registry
            .resolve(&job.purge_connection)
            .map_err(|e| (Stage::ResolvePurgeConnection, e))?;

        tracing::info!(
            connection = %purge_profile.name,
            artifact = %artifact.local_path.display(),
            "Upload verified, purging archived rows"
        );

        let deleter = self
            .connector
            .connect(purge_profile, &job.database)
            .await
            .map_err(|e| {
                (
                    Stage::Purge,
                    ArchiverError::Purge {
                        deleted: 0,
                        message: format!("{:#}", e),
                    },
                )
            })?;

        let deleted = purge::purge(
            deleter.as_ref(),
            job.table.as_deref().unwrap_or_default(),
            &job.row_predicate,
            job.purge_batch_limit,
        )
        .await
        .map_err(|e| (Stage::Purge, e))?;

        Ok(JobOutcome::Completed {
            remote_key,
            verification,
            purge: PurgeOutcome::Deleted(deleted),
        })
    }
}
