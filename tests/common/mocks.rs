use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use mysql_s3_archiver::dump::{DumpCommand, DumpExecutor};
use mysql_s3_archiver::purge::{PurgeConnector, PurgeStatement, RowDeleter};
use mysql_s3_archiver::storage::ObjectStore;
use mysql_s3_archiver::ConnectionProfile;

/// Writes a fake compressed artifact, or fails (or panics) for the configured tables.
#[derive(Default)]
pub struct ScriptedDumper {
    pub fail_tables: HashSet<String>,
    pub panic_tables: HashSet<String>,
    pub calls: Mutex<Vec<DumpCommand>>,
}

#[allow(dead_code)]
impl ScriptedDumper {
    pub fn failing_on(tables: &[&str]) -> Self {
        Self {
            fail_tables: tables.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn panicking_on(tables: &[&str]) -> Self {
        Self {
            panic_tables: tables.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DumpExecutor for ScriptedDumper {
    async fn execute(&self, command: &DumpCommand, destination: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(command.clone());
        let table = command
            .args
            .iter()
            .position(|a| a == "--tables")
            .and_then(|i| command.args.get(i + 1))
            .cloned()
            .unwrap_or_default();
        if self.panic_tables.contains(&table) {
            panic!("dump executor crashed on table {table}");
        }
        if self.fail_tables.contains(&table) {
            bail!("mysqldump exited with exit status: 2: Access denied");
        }
        tokio::fs::write(destination, b"\x1f\x8bfake gzip payload").await?;
        Ok(())
    }
}

/// In-memory bucket/key -> size map with switchable failure modes.
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<(String, String), u64>>,
    pub metadata: Mutex<HashMap<(String, String), HashMap<String, String>>>,
    /// `put_file` returns an error.
    pub fail_put: bool,
    /// `put_file` claims success but stores nothing, so read-back finds no object.
    pub drop_puts: bool,
    /// `put_file` stores a zero-length object.
    pub store_empty: bool,
    pub puts: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn size_of(&self, bucket: &str, key: &str) -> Option<u64> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .copied()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_put {
            bail!("PutObject failed: AccessDenied");
        }
        if self.drop_puts {
            return Ok(());
        }
        let size = if self.store_empty {
            0
        } else {
            tokio::fs::metadata(path).await?.len()
        };
        let id = (bucket.to_string(), key.to_string());
        self.objects.lock().unwrap().insert(id.clone(), size);
        self.metadata.lock().unwrap().insert(id, metadata.clone());
        Ok(())
    }

    async fn object_size(&self, bucket: &str, key: &str) -> Result<Option<u64>> {
        Ok(self.size_of(bucket, key))
    }
}

/// Shared fake table: every connection deletes from the same pool of matching rows.
pub struct CountingConnector {
    pub remaining: Arc<Mutex<u64>>,
    pub batches: Arc<Mutex<Vec<u64>>>,
    pub connected_to: Mutex<Vec<(String, String)>>,
    pub connects: AtomicUsize,
}

#[allow(dead_code)]
impl CountingConnector {
    pub fn with_rows(rows: u64) -> Self {
        Self {
            remaining: Arc::new(Mutex::new(rows)),
            batches: Arc::new(Mutex::new(Vec::new())),
            connected_to: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

struct FakeDeleter {
    remaining: Arc<Mutex<u64>>,
    batches: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl RowDeleter for FakeDeleter {
    async fn delete_batch(&self, statement: &PurgeStatement) -> Result<u64> {
        let mut remaining = self.remaining.lock().unwrap();
        let affected = statement.limit.min(*remaining);
        *remaining -= affected;
        self.batches.lock().unwrap().push(affected);
        Ok(affected)
    }
}

#[async_trait]
impl PurgeConnector for CountingConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
        database: &str,
    ) -> Result<Box<dyn RowDeleter>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected_to
            .lock()
            .unwrap()
            .push((profile.name.clone(), database.to_string()));
        Ok(Box::new(FakeDeleter {
            remaining: Arc::clone(&self.remaining),
            batches: Arc::clone(&self.batches),
        }))
    }
}
