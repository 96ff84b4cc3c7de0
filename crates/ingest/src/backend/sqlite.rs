//! SQLite storage backend (§4.3.1).
//!
//! One file per `(year, month)` partition, named `<prefix>_YYYYMM.<ext>`
//! from the configured `database` path. Pragmas and the prepared-statement
//! insert pattern follow the WAL-mode logger shape used elsewhere in the
//! corpus; the schema itself (primary table + FTS5 shadow table kept in
//! sync by triggers) is new, per §4.3.1.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use syslogd_core::backend::StorageBackend;
use syslogd_core::error::BackendError;
use syslogd_core::metrics::BACKEND_PARTITION_ROLLOVERS_TOTAL;
use syslogd_core::types::{LogRecord, PartitionKey};

const PRIMARY_TABLE: &str = "syslog";
const FTS_TABLE: &str = "syslog_fts";

/// Opens one SQLite file per partition, holding at most one connection at
/// a time — the active-partition-single-writer rule (§5) means a rollover
/// simply closes the old connection and opens the next file.
pub struct SqliteBackend {
    prefix: PathBuf,
    ext: String,
    current: Option<(PartitionKey, Connection)>,
}

impl SqliteBackend {
    /// `database_path` is the configured `sqlite.database` value, e.g.
    /// `syslog.sqlite3`; partition files are written alongside it as
    /// `<stem>_YYYYMM.<ext>`.
    pub fn new(database_path: &Path) -> Self {
        let ext = database_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("sqlite3")
            .to_owned();
        let stem = database_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("syslog")
            .to_owned();
        let prefix = match database_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(stem),
            _ => PathBuf::from(stem),
        };
        Self {
            prefix,
            ext,
            current: None,
        }
    }

    fn partition_path(&self, key: PartitionKey) -> PathBuf {
        partition_path(&self.prefix, &self.ext, key)
    }

    fn open_partition(&self, key: PartitionKey) -> Result<Connection, BackendError> {
        open_partition(&self.prefix, &self.ext, key)
    }
}

fn partition_path(prefix: &Path, ext: &str, key: PartitionKey) -> PathBuf {
    let mut path = prefix.to_path_buf();
    let file_name = format!(
        "{}_{}.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("syslog"),
        key.as_yyyymm(),
        ext
    );
    path.set_file_name(file_name);
    path
}

fn open_partition(prefix: &Path, ext: &str, key: PartitionKey) -> Result<Connection, BackendError> {
    let path = partition_path(prefix, ext, key);
    let conn = Connection::open_with_flags(
        &path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| BackendError::PartitionOpen {
        partition: key.to_string(),
        reason: e.to_string(),
    })?;
    apply_pragmas(&conn).map_err(|e| BackendError::PartitionOpen {
        partition: key.to_string(),
        reason: e.to_string(),
    })?;
    apply_schema(&conn).map_err(|e| BackendError::PartitionOpen {
        partition: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -16000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )
}

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {PRIMARY_TABLE} (
            ID INTEGER PRIMARY KEY AUTOINCREMENT,
            Facility INTEGER NOT NULL,
            Priority INTEGER NOT NULL,
            FromHost TEXT NOT NULL,
            DeviceReportedTime TEXT NOT NULL,
            ReceivedAt TEXT NOT NULL,
            InfoUnitID INTEGER,
            SysLogTag TEXT NOT NULL,
            Message TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS {FTS_TABLE} USING fts5(
            Message,
            content='{PRIMARY_TABLE}',
            content_rowid='ID'
        );

        CREATE TRIGGER IF NOT EXISTS {PRIMARY_TABLE}_ai AFTER INSERT ON {PRIMARY_TABLE} BEGIN
            INSERT INTO {FTS_TABLE}(rowid, Message) VALUES (new.ID, new.Message);
        END;
        CREATE TRIGGER IF NOT EXISTS {PRIMARY_TABLE}_ad AFTER DELETE ON {PRIMARY_TABLE} BEGIN
            INSERT INTO {FTS_TABLE}({FTS_TABLE}, rowid, Message) VALUES ('delete', old.ID, old.Message);
        END;
        CREATE TRIGGER IF NOT EXISTS {PRIMARY_TABLE}_au AFTER UPDATE ON {PRIMARY_TABLE} BEGIN
            INSERT INTO {FTS_TABLE}({FTS_TABLE}, rowid, Message) VALUES ('delete', old.ID, old.Message);
            INSERT INTO {FTS_TABLE}(rowid, Message) VALUES (new.ID, new.Message);
        END;"
    ))
}

fn insert_batch(conn: &mut Connection, records: &[LogRecord]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO {PRIMARY_TABLE} (
                Facility, Priority, FromHost, DeviceReportedTime, ReceivedAt,
                InfoUnitID, SysLogTag, Message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))?;
        for record in records {
            stmt.execute(params![
                record.facility,
                record.priority,
                record.hostname,
                record.device_reported_time.to_rfc3339(),
                record.received_at.to_rfc3339(),
                Option::<i64>::None,
                record.tag,
                record.message,
            ])?;
        }
    }
    tx.commit()?;
    Ok(records.len())
}

impl StorageBackend for SqliteBackend {
    async fn ensure_partition(&mut self, key: PartitionKey) -> Result<(), BackendError> {
        match self.current.as_ref().map(|(k, _)| *k) {
            Some(current) if current == key => return Ok(()),
            Some(_) => metrics::counter!(BACKEND_PARTITION_ROLLOVERS_TOTAL).increment(1),
            None => {}
        }
        let prefix = self.prefix.clone();
        let ext = self.ext.clone();
        let conn = tokio::task::spawn_blocking(move || open_partition(&prefix, &ext, key))
            .await
            .map_err(|e| BackendError::PartitionOpen {
                partition: key.to_string(),
                reason: format!("blocking task panicked: {e}"),
            })??;
        self.current = Some((key, conn));
        Ok(())
    }

    async fn write_batch(
        &mut self,
        key: PartitionKey,
        records: Vec<LogRecord>,
    ) -> Result<usize, BackendError> {
        if records.is_empty() {
            return Ok(0);
        }
        if self.current.as_ref().map(|(k, _)| *k) != Some(key) {
            self.ensure_partition(key).await?;
        }
        let (_, mut conn) = self.current.take().expect("partition connection just ensured");

        let prefix = self.prefix.clone();
        let ext = self.ext.clone();
        let task_records = records.clone();
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let first = insert_batch(&mut conn, &task_records);
            match first {
                Ok(n) => (conn, Ok(n)),
                Err(first_err) => {
                    // Constraint violation: retry once after reopening the file (§4.3.1).
                    let reopened = open_partition(&prefix, &ext, key);
                    match reopened {
                        Ok(mut reopened_conn) => {
                            let retried = insert_batch(&mut reopened_conn, &task_records).map_err(|e| {
                                BackendError::Fatal {
                                    count: task_records.len(),
                                    reason: format!(
                                        "insert failed after reopen (first error: {first_err}): {e}"
                                    ),
                                }
                            });
                            (reopened_conn, retried)
                        }
                        Err(e) => (conn, Err(e)),
                    }
                }
            }
        })
        .await
        .map_err(|e| BackendError::Fatal {
            count: records.len(),
            reason: format!("blocking task panicked: {e}"),
        })?;

        self.current = Some((key, conn));
        result
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.current = None;
        Ok(())
    }
}
