// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

//! Append-only usage log of intercepted provider calls.
//!
//! Producers (binder threads) push onto a bounded queue and never wait; one
//! writer thread owns the storage handle and drains the queue in batches.
//! Reads and clears travel through the same queue so the writer stays the
//! only user of the connection.

use std::{
    collections::HashMap,
    fmt,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
// SQLite's default SQLITE_MAX_VARIABLE_NUMBER is 999 on older builds.
const COUNT_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Query,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Insert,
        OperationKind::Query,
        OperationKind::Delete,
    ];

    /// Identifier used by the RPC surface.
    pub fn table_id(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Query => "query",
            OperationKind::Delete => "delete",
        }
    }

    pub fn from_table_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.table_id() == id)
    }

    fn sql_table(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert_record",
            OperationKind::Query => "query_record",
            OperationKind::Delete => "delete_record",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_id())
    }
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Wall-clock milliseconds, never smaller than a previously returned value.
pub fn monotonic_millis() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let prev = LAST_TIMESTAMP.fetch_max(now, Ordering::Relaxed);
    prev.max(now)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub operation: OperationKind,
    pub calling_package: String,
    pub canonical_path: Option<String>,
    pub mime_type: Option<String>,
    pub timestamp: i64,
}

impl UsageRecord {
    pub fn new(
        operation: OperationKind,
        calling_package: impl Into<String>,
        canonical_path: Option<String>,
        mime_type: Option<String>,
    ) -> Self {
        Self {
            operation,
            calling_package: calling_package.into(),
            canonical_path,
            mime_type,
            timestamp: monotonic_millis(),
        }
    }
}

/// Persistent side of the record store. Only the writer thread touches it.
pub trait RecordBackend: Send + 'static {
    fn insert_batch(&mut self, records: &[UsageRecord]) -> Result<(), StoreError>;

    /// Counts per package; every requested package is present in the result.
    fn usage_counts(
        &mut self,
        kind: OperationKind,
        packages: &[String],
    ) -> Result<HashMap<String, u64>, StoreError>;

    /// Removes every record of every table, or nothing.
    fn clear_all(&mut self) -> Result<(), StoreError>;
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        log::debug!("record store journal mode: {}", mode);

        for kind in OperationKind::ALL {
            let table = kind.sql_table();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY,
                    timestamp INTEGER NOT NULL,
                    package_name TEXT NOT NULL,
                    data TEXT,
                    mime_type TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_package ON {table}(package_name);"
            ))?;
        }
        Ok(Self { conn })
    }
}

impl RecordBackend for SqliteBackend {
    fn insert_batch(&mut self, records: &[UsageRecord]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for record in records {
            let sql = format!(
                "INSERT INTO {} (timestamp, package_name, data, mime_type) VALUES (?1, ?2, ?3, ?4)",
                record.operation.sql_table()
            );
            tx.prepare_cached(&sql)?.execute(params![
                record.timestamp,
                record.calling_package,
                record.canonical_path,
                record.mime_type,
            ])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn usage_counts(
        &mut self,
        kind: OperationKind,
        packages: &[String],
    ) -> Result<HashMap<String, u64>, StoreError> {
        let mut counts: HashMap<String, u64> =
            packages.iter().map(|p| (p.clone(), 0)).collect();

        for chunk in packages.chunks(COUNT_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT package_name, COUNT(*) FROM {} WHERE package_name IN ({}) GROUP BY package_name",
                kind.sql_table(),
                placeholders
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (package, count) = row?;
                counts.insert(package, count.max(0) as u64);
            }
        }
        Ok(counts)
    }

    fn clear_all(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for kind in OperationKind::ALL {
            tx.execute(&format!("DELETE FROM {}", kind.sql_table()), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

type Reply<T> = Sender<Result<T, StoreError>>;

enum Command {
    Append(UsageRecord),
    Counts {
        kind: OperationKind,
        packages: Vec<String>,
        reply: Reply<HashMap<String, u64>>,
    },
    Clear {
        reply: Reply<()>,
    },
    Flush {
        reply: Reply<()>,
    },
}

/// Producer handle of the record store. Cheap to clone.
#[derive(Clone)]
pub struct RecordStore {
    tx: SyncSender<Command>,
    dropped: Arc<AtomicU64>,
}

/// Join handle of the writer thread; it exits once every store handle is gone.
pub struct RecordWriter {
    handle: JoinHandle<()>,
}

impl RecordWriter {
    pub fn join(self) {
        if self.handle.join().is_err() {
            log::error!("record writer thread panicked");
        }
    }
}

impl RecordStore {
    pub fn spawn<B: RecordBackend>(
        backend: B,
        capacity: usize,
        batch_size: usize,
    ) -> std::io::Result<(Self, RecordWriter)> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let batch_size = batch_size.max(1);
        let handle = thread::Builder::new()
            .name("mpm-records".into())
            .spawn(move || run_writer(backend, rx, batch_size))?;
        Ok((
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            RecordWriter { handle },
        ))
    }

    /// Enqueues a record without waiting. A full or closed queue drops it.
    pub fn append(&self, record: UsageRecord) {
        match self.tx.try_send(Command::Append(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(Command::Append(record))) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "record queue full, dropped {} record from {} (total dropped: {})",
                    record.operation,
                    record.calling_package,
                    total
                );
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("record writer is gone, dropping record");
            }
        }
    }

    pub fn usage_counts(
        &self,
        kind: OperationKind,
        packages: Vec<String>,
    ) -> Result<HashMap<String, u64>, StoreError> {
        self.request(|reply| Command::Counts {
            kind,
            packages,
            reply,
        })
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.request(|reply| Command::Clear { reply })
    }

    /// Waits until every record appended before this call is persisted.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.request(|reply| Command::Flush { reply })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, StoreError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| StoreError::WriterGone)?;
        rx.recv().map_err(|_| StoreError::WriterGone)?
    }
}

fn run_writer<B: RecordBackend>(mut backend: B, rx: Receiver<Command>, batch_size: usize) {
    log::debug!("record writer started");
    let mut batch: Vec<UsageRecord> = Vec::with_capacity(batch_size);

    while let Ok(first) = rx.recv() {
        let mut next = Some(first);
        while let Some(command) = next.take() {
            match command {
                Command::Append(record) => {
                    batch.push(record);
                    if batch.len() < batch_size {
                        next = rx.try_recv().ok();
                    }
                }
                Command::Counts {
                    kind,
                    packages,
                    reply,
                } => {
                    persist_batch(&mut backend, &mut batch);
                    let _ = reply.send(backend.usage_counts(kind, &packages));
                }
                Command::Clear { reply } => {
                    persist_batch(&mut backend, &mut batch);
                    let result = backend.clear_all();
                    if let Err(e) = &result {
                        log::error!("clearing usage records failed: {}", e);
                    }
                    let _ = reply.send(result);
                }
                Command::Flush { reply } => {
                    persist_batch(&mut backend, &mut batch);
                    let _ = reply.send(Ok(()));
                }
            }
        }
        persist_batch(&mut backend, &mut batch);
    }

    persist_batch(&mut backend, &mut batch);
    log::debug!("record writer stopped");
}

fn persist_batch<B: RecordBackend>(backend: &mut B, batch: &mut Vec<UsageRecord>) {
    if batch.is_empty() {
        return;
    }
    if let Err(first) = backend.insert_batch(batch) {
        log::warn!("record batch write failed, retrying once: {}", first);
        if let Err(e) = backend.insert_batch(batch) {
            log::error!("dropping {} usage records: {}", batch.len(), e);
        }
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::Instant,
    };

    use super::*;

    struct SlowBackend {
        delay: Duration,
        written: Arc<Mutex<Vec<UsageRecord>>>,
    }

    impl RecordBackend for SlowBackend {
        fn insert_batch(&mut self, records: &[UsageRecord]) -> Result<(), StoreError> {
            thread::sleep(self.delay);
            self.written.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        fn usage_counts(
            &mut self,
            _kind: OperationKind,
            packages: &[String],
        ) -> Result<HashMap<String, u64>, StoreError> {
            Ok(packages.iter().map(|p| (p.clone(), 0)).collect())
        }

        fn clear_all(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn record(kind: OperationKind, package: &str) -> UsageRecord {
        UsageRecord::new(kind, package, Some("/storage/emulated/0/a.jpg".into()), None)
    }

    #[test]
    fn append_returns_before_slow_write_completes() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let backend = SlowBackend {
            delay: Duration::from_millis(300),
            written: written.clone(),
        };
        let (store, writer) = RecordStore::spawn(backend, 16, 8).unwrap();

        let start = Instant::now();
        store.append(record(OperationKind::Insert, "com.example.app"));
        assert!(start.elapsed() < Duration::from_millis(150));
        assert!(written.lock().unwrap().is_empty());

        store.flush().unwrap();
        assert_eq!(written.lock().unwrap().len(), 1);

        drop(store);
        writer.join();
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let backend = SlowBackend {
            delay: Duration::from_millis(200),
            written: Arc::new(Mutex::new(Vec::new())),
        };
        let (store, writer) = RecordStore::spawn(backend, 1, 1).unwrap();

        let start = Instant::now();
        for _ in 0..10 {
            store.append(record(OperationKind::Query, "com.example.app"));
        }
        assert!(start.elapsed() < Duration::from_millis(150));
        assert!(store.dropped() > 0);

        drop(store);
        writer.join();
    }

    #[test]
    fn counts_cover_every_requested_package() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let (store, writer) = RecordStore::spawn(backend, 64, 8).unwrap();

        for _ in 0..3 {
            store.append(record(OperationKind::Insert, "com.a"));
        }
        store.append(record(OperationKind::Insert, "com.b"));
        store.append(record(OperationKind::Delete, "com.a"));

        let counts = store
            .usage_counts(
                OperationKind::Insert,
                vec!["com.a".into(), "com.b".into(), "com.c".into()],
            )
            .unwrap();
        assert_eq!(counts["com.a"], 3);
        assert_eq!(counts["com.b"], 1);
        assert_eq!(counts["com.c"], 0);

        let deletes = store
            .usage_counts(OperationKind::Delete, vec!["com.a".into()])
            .unwrap();
        assert_eq!(deletes["com.a"], 1);

        store.clear_all().unwrap();
        let after = store
            .usage_counts(OperationKind::Insert, vec!["com.a".into()])
            .unwrap();
        assert_eq!(after["com.a"], 0);

        drop(store);
        writer.join();
    }

    #[test]
    fn counts_span_multiple_statement_chunks() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let packages: Vec<String> = (0..600).map(|i| format!("com.app{i}")).collect();
        let records: Vec<UsageRecord> = packages
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 3 == 0)
            .map(|(_, p)| record(OperationKind::Query, p))
            .collect();
        backend.insert_batch(&records).unwrap();
        backend
            .insert_batch(&[record(OperationKind::Query, "com.app599")])
            .unwrap();

        let counts = backend.usage_counts(OperationKind::Query, &packages).unwrap();
        assert_eq!(counts.len(), 600);
        assert_eq!(counts["com.app0"], 1);
        assert_eq!(counts["com.app1"], 0);
        assert_eq!(counts["com.app501"], 1);
        assert_eq!(counts["com.app502"], 0);
        assert_eq!(counts["com.app599"], 1);
        assert_eq!(counts.values().sum::<u64>(), 201);
    }

    #[test]
    fn failed_clear_leaves_records_untouched() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .insert_batch(&[
                record(OperationKind::Insert, "com.a"),
                record(OperationKind::Query, "com.a"),
                record(OperationKind::Delete, "com.a"),
            ])
            .unwrap();

        // delete_record is cleared last, so the insert and query deletions
        // have already run inside the transaction when this fires.
        backend
            .conn
            .execute_batch(
                "CREATE TRIGGER fail_clear BEFORE DELETE ON delete_record
                 BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
            )
            .unwrap();

        assert!(backend.clear_all().is_err());
        let pkgs = vec!["com.a".to_string()];
        for kind in OperationKind::ALL {
            assert_eq!(backend.usage_counts(kind, &pkgs).unwrap()["com.a"], 1);
        }

        backend.conn.execute_batch("DROP TRIGGER fail_clear").unwrap();
        backend.clear_all().unwrap();
        for kind in OperationKind::ALL {
            assert_eq!(backend.usage_counts(kind, &pkgs).unwrap()["com.a"], 0);
        }
    }

    #[test]
    fn records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("media_provider.db");
        {
            let mut backend = SqliteBackend::open(&db).unwrap();
            backend
                .insert_batch(&[UsageRecord::new(
                    OperationKind::Insert,
                    "com.a",
                    None,
                    Some("image/jpeg".into()),
                )])
                .unwrap();
        }
        let mut backend = SqliteBackend::open(&db).unwrap();
        let counts = backend
            .usage_counts(OperationKind::Insert, &["com.a".to_string()])
            .unwrap();
        assert_eq!(counts["com.a"], 1);
    }

    #[test]
    fn table_ids_round_trip() {
        for kind in OperationKind::ALL {
            assert_eq!(OperationKind::from_table_id(kind.table_id()), Some(kind));
        }
        assert_eq!(OperationKind::from_table_id("MediaProviderInsertRecord"), None);
        assert_eq!(OperationKind::from_table_id(""), None);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut last = 0;
        for _ in 0..1000 {
            let now = monotonic_millis();
            assert!(now >= last);
            last = now;
        }
    }
}
