use std::path::Path;

use chrono::{DateTime, Local, TimeZone};
use mysql_s3_archiver::{ConnectionProfile, ConnectionRegistry, JobSpec};

pub fn fixed_time() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap()
}

pub fn profile(name: &str) -> ConnectionProfile {
    ConnectionProfile {
        name: name.to_string(),
        host: format!("{}.db.internal", name),
        port: 3306,
        username: "backup".to_string(),
        password: "hunter2".to_string(),
    }
}

pub fn registry() -> ConnectionRegistry {
    ConnectionRegistry::new(vec![profile("replica"), profile("primary")])
}

/// A table-scoped job with purge enabled, dumping via `replica` and purging via `primary`.
pub fn job(table: &str, dir: &Path) -> JobSpec {
    JobSpec {
        database: "app".to_string(),
        table: Some(table.to_string()),
        row_predicate: "created_at<'2020-01-01'".to_string(),
        local_output_dir: dir.to_path_buf(),
        remote_dir: "mysql/app".to_string(),
        remote_bucket: "archive".to_string(),
        auto_purge: true,
        purge_batch_limit: 500,
        dump_connection: "replica".to_string(),
        purge_connection: "primary".to_string(),
    }
}
