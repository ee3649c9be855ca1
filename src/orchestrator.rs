// ABOUTME: Fans out one task per configured job and waits for all of them
// ABOUTME: A failing job never cancels its siblings; results are only logged and returned

use std::sync::Arc;

use futures::future::join_all;
use tracing::Instrument;

use crate::config::JobSpec;
use crate::pipeline::{JobOutcome, JobReport, Pipeline, Stage};

/// Run every job concurrently and return their reports in job order.
pub async fn run(pipeline: Arc<Pipeline>, jobs: Vec<JobSpec>) -> Vec<JobReport> {
    tracing::info!(jobs = jobs.len(), "Starting backup run");

    let (labels, handles): (Vec<String>, Vec<_>) = jobs
        .into_iter()
        .map(|job| {
            let label = job.label();
            let span = tracing::info_span!("job", job = %label);
            let pipeline = Arc::clone(&pipeline);
            let handle = tokio::spawn(async move { pipeline.run_job(&job).await }.instrument(span));
            (label, handle)
        })
        .unzip();

    let reports: Vec<JobReport> = labels
        .into_iter()
        .zip(join_all(handles).await)
        .map(|(label, joined)| match joined {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(job = %label, error = %err, "Job task failed");
                JobReport {
                    job: label,
                    outcome: JobOutcome::Aborted {
                        stage: Stage::Task,
                        error: err.to_string(),
                    },
                }
            }
        })
        .collect();

    log_summary(&reports);
    reports
}

fn log_summary(reports: &[JobReport]) {
    for report in reports {
        match &report.outcome {
            JobOutcome::Completed {
                remote_key,
                verification,
                purge,
            } => tracing::info!(
                job = %report.job,
                key = %remote_key,
                verified = verification.verified(),
                purge = ?purge,
                "Job summary"
            ),
            JobOutcome::Aborted { stage, error } => tracing::warn!(
                job = %report.job,
                stage = %stage,
                error = %error,
                "Job summary"
            ),
        }
    }

    let succeeded = reports.iter().filter(|r| r.succeeded()).count();
    tracing::info!(
        total = reports.len(),
        succeeded,
        failed = reports.len() - succeeded,
        "Backup run finished"
    );
}
