// Pipeline and orchestrator behaviour against in-memory collaborators

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{fixed_time, job, registry, CountingConnector, MemoryStore, ScriptedDumper};
use mysql_s3_archiver::{orchestrator, JobOutcome, Pipeline, PurgeOutcome, Stage};
use tempfile::TempDir;

struct Harness {
    dumper: Arc<ScriptedDumper>,
    store: Arc<MemoryStore>,
    connector: Arc<CountingConnector>,
    pipeline: Arc<Pipeline>,
}

fn harness(dumper: ScriptedDumper, store: MemoryStore, rows: u64) -> Harness {
    let dumper = Arc::new(dumper);
    let store = Arc::new(store);
    let connector = Arc::new(CountingConnector::with_rows(rows));
    let pipeline = Arc::new(Pipeline::new(
        registry(),
        dumper.clone(),
        store.clone(),
        connector.clone(),
    ));
    Harness {
        dumper,
        store,
        connector,
        pipeline,
    }
}

#[tokio::test]
async fn test_full_pipeline_purges_1200_rows_in_three_batches() {
    let dir = TempDir::new().unwrap();
    let h = harness(ScriptedDumper::default(), MemoryStore::default(), 1200);

    let report = h
        .pipeline
        .run_job_at(&job("users", dir.path()), &fixed_time())
        .await;

    let expected_key = "mysql/app/202403/20240307/users_202403070905.sql.gz";
    match &report.outcome {
        JobOutcome::Completed {
            remote_key,
            verification,
            purge,
        } => {
            assert_eq!(remote_key, expected_key);
            assert!(verification.verified());
            assert_eq!(*purge, PurgeOutcome::Deleted(1200));
        }
        other => panic!("expected completed job, got {:?}", other),
    }
    assert!(report.succeeded());
    assert_eq!(report.job, "app.users");

    assert_eq!(*h.connector.batches.lock().unwrap(), vec![500, 500, 200, 0]);
    assert_eq!(*h.connector.remaining.lock().unwrap(), 0);
    assert!(h.store.size_of("archive", expected_key).unwrap() > 0);
    assert!(dir.path().join("users_202403070905.sql.gz").exists());

    let metadata = h.store.metadata.lock().unwrap();
    let sha = &metadata[&("archive".to_string(), expected_key.to_string())]["sha256"];
    assert_eq!(sha.len(), 64);
}

#[tokio::test]
async fn test_dump_and_purge_use_their_own_connections() {
    let dir = TempDir::new().unwrap();
    let h = harness(ScriptedDumper::default(), MemoryStore::default(), 10);

    h.pipeline
        .run_job_at(&job("users", dir.path()), &fixed_time())
        .await;

    let dumps = h.dumper.calls.lock().unwrap();
    assert!(dumps[0].args.contains(&"replica.db.internal".to_string()));
    assert_eq!(
        *h.connector.connected_to.lock().unwrap(),
        vec![("primary".to_string(), "app".to_string())]
    );
}

#[tokio::test]
async fn test_unverified_upload_never_purges() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore {
        drop_puts: true,
        ..Default::default()
    };
    let h = harness(ScriptedDumper::default(), store, 1200);

    let report = h
        .pipeline
        .run_job_at(&job("users", dir.path()), &fixed_time())
        .await;

    match &report.outcome {
        JobOutcome::Completed {
            verification,
            purge,
            ..
        } => {
            assert!(!verification.exists);
            assert_eq!(*purge, PurgeOutcome::SkippedUnverified);
        }
        other => panic!("expected completed job, got {:?}", other),
    }
    assert!(!report.succeeded());
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(*h.connector.remaining.lock().unwrap(), 1200);
}

#[tokio::test]
async fn test_empty_remote_object_never_purges() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore {
        store_empty: true,
        ..Default::default()
    };
    let h = harness(ScriptedDumper::default(), store, 50);

    let report = h
        .pipeline
        .run_job_at(&job("users", dir.path()), &fixed_time())
        .await;

    assert!(matches!(
        report.outcome,
        JobOutcome::Completed {
            purge: PurgeOutcome::SkippedUnverified,
            ..
        }
    ));
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_missing_dump_connection_aborts_before_any_process() {
    let dir = TempDir::new().unwrap();
    let h = harness(ScriptedDumper::default(), MemoryStore::default(), 10);
    let mut spec = job("users", dir.path());
    spec.dump_connection = "missing".to_string();

    let report = h.pipeline.run_job_at(&spec, &fixed_time()).await;

    match &report.outcome {
        JobOutcome::Aborted { stage, error } => {
            assert_eq!(*stage, Stage::ResolveDumpConnection);
            assert!(error.contains("'missing' not found"));
        }
        other => panic!("expected aborted job, got {:?}", other),
    }
    assert_eq!(h.dumper.call_count(), 0);
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_missing_purge_connection_aborts_after_upload() {
    let dir = TempDir::new().unwrap();
    let h = harness(ScriptedDumper::default(), MemoryStore::default(), 10);
    let mut spec = job("users", dir.path());
    spec.purge_connection = "missing".to_string();

    let report = h.pipeline.run_job_at(&spec, &fixed_time()).await;

    assert!(matches!(
        report.outcome,
        JobOutcome::Aborted {
            stage: Stage::ResolvePurgeConnection,
            ..
        }
    ));
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_empty_predicate_never_dumps_or_purges() {
    let dir = TempDir::new().unwrap();
    let h = harness(ScriptedDumper::default(), MemoryStore::default(), 10);
    let mut spec = job("users", dir.path());
    spec.row_predicate = "  ".to_string();

    let report = h.pipeline.run_job_at(&spec, &fixed_time()).await;

    assert!(matches!(
        report.outcome,
        JobOutcome::Aborted {
            stage: Stage::Validate,
            ..
        }
    ));
    assert_eq!(h.dumper.call_count(), 0);
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(*h.connector.remaining.lock().unwrap(), 10);
}

#[tokio::test]
async fn test_upload_failure_skips_verify_and_purge() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore {
        fail_put: true,
        ..Default::default()
    };
    let h = harness(ScriptedDumper::default(), store, 10);

    let report = h
        .pipeline
        .run_job_at(&job("users", dir.path()), &fixed_time())
        .await;

    match &report.outcome {
        JobOutcome::Aborted { stage, error } => {
            assert_eq!(*stage, Stage::Upload);
            assert!(error.contains("AccessDenied"));
        }
        other => panic!("expected aborted job, got {:?}", other),
    }
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_dump_failure_aborts_job_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        ScriptedDumper::failing_on(&["users"]),
        MemoryStore::default(),
        10,
    );

    let report = h
        .pipeline
        .run_job_at(&job("users", dir.path()), &fixed_time())
        .await;

    assert!(matches!(
        report.outcome,
        JobOutcome::Aborted {
            stage: Stage::Dump,
            ..
        }
    ));
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(h.connector.connect_count(), 0);
    assert!(!dir.path().join("users_202403070905.sql.gz").exists());
}

#[tokio::test]
async fn test_auto_purge_disabled_keeps_rows() {
    let dir = TempDir::new().unwrap();
    let h = harness(ScriptedDumper::default(), MemoryStore::default(), 10);
    let mut spec = job("users", dir.path());
    spec.auto_purge = false;

    let report = h.pipeline.run_job_at(&spec, &fixed_time()).await;

    assert!(matches!(
        report.outcome,
        JobOutcome::Completed {
            purge: PurgeOutcome::Disabled,
            ..
        }
    ));
    assert!(report.succeeded());
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_failing_job_does_not_stop_siblings() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        ScriptedDumper::failing_on(&["broken"]),
        MemoryStore::default(),
        0,
    );
    let jobs = vec![
        job("broken", dir.path()),
        job("orders", dir.path()),
        job("events", dir.path()),
    ];

    let reports = orchestrator::run(h.pipeline.clone(), jobs).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].job, "app.broken");
    assert!(matches!(
        reports[0].outcome,
        JobOutcome::Aborted {
            stage: Stage::Dump,
            ..
        }
    ));
    for report in &reports[1..] {
        assert!(report.succeeded(), "{:?}", report);
    }
    assert_eq!(h.dumper.call_count(), 3);
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panicking_job_is_reported_and_siblings_finish() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        ScriptedDumper::panicking_on(&["crashy"]),
        MemoryStore::default(),
        0,
    );
    let jobs = vec![
        job("orders", dir.path()),
        job("crashy", dir.path()),
        job("events", dir.path()),
    ];

    let reports = orchestrator::run(h.pipeline.clone(), jobs).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[1].job, "app.crashy");
    match &reports[1].outcome {
        JobOutcome::Aborted { stage, error } => {
            assert_eq!(*stage, Stage::Task);
            assert!(error.contains("panic"), "{}", error);
        }
        other => panic!("expected aborted job, got {:?}", other),
    }
    assert!(reports[0].succeeded(), "{:?}", reports[0]);
    assert!(reports[2].succeeded(), "{:?}", reports[2]);
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 2);
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test]
async fn test_distinct_tables_in_one_run_produce_distinct_artifacts() {
    let dir = TempDir::new().unwrap();
    let h = harness(ScriptedDumper::default(), MemoryStore::default(), 0);
    let jobs: Vec<_> = ["users", "orders", "events", "sessions"]
        .iter()
        .map(|t| job(t, dir.path()))
        .collect();

    let reports = orchestrator::run(h.pipeline.clone(), jobs).await;

    assert!(reports.iter().all(|r| r.succeeded()));
    assert_eq!(h.store.objects.lock().unwrap().len(), 4);
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 4);
}
