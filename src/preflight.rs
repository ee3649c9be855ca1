// ABOUTME: Static checks over a loaded config: required tools, predicates, connection names
// ABOUTME: Used by the validate command and logged as warnings before a run

use crate::config::Config;
use crate::dump;
use crate::registry::ConnectionRegistry;

/// Problems that will make one or more jobs abort. Empty means the config looks runnable.
pub fn check(config: &Config) -> Vec<String> {
    let mut problems: Vec<String> = dump::missing_tools()
        .into_iter()
        .map(|tool| format!("{} not found on PATH", tool))
        .collect();
    problems.extend(check_jobs(config));
    problems
}

/// Job-level checks only, independent of the host's installed tools.
pub fn check_jobs(config: &Config) -> Vec<String> {
    let registry = ConnectionRegistry::new(config.connections.clone());
    let mut problems = Vec::new();

    for job in &config.jobs {
        let label = job.label();
        if !job.has_predicate() {
            problems.push(format!(
                "job {}: whereOperation is empty, the job will be refused",
                label
            ));
        }
        if registry.resolve(&job.dump_connection).is_err() {
            problems.push(format!(
                "job {}: dumpUseDb '{}' does not match any connectionName",
                label, job.dump_connection
            ));
        }
        if job.auto_purge && registry.resolve(&job.purge_connection).is_err() {
            problems.push(format!(
                "job {}: deleteUseDb '{}' does not match any connectionName",
                label, job.purge_connection
            ));
        }
    }

    problems
}
