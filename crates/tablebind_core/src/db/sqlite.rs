//! SQLite implementation of [`Store`].
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections and apply connection pragmas.
//! - Execute parameterized statements and classify engine errors.
//!
//! # Invariants
//! - Opened connections honour `foreign_keys` and `busy_timeout` settings.
//! - A configured statement timeout interrupts statements that overrun it.

use super::config::AdapterConfig;
use super::{StatementOutcome, Store};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use log::{debug, error, info};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MEMORY_LOCATION: &str = ":memory:";
const PROGRESS_CHECK_OPS: i32 = 1_000;

pub struct SqliteStore {
    conn: Connection,
    location: String,
    statement_timeout: Option<Duration>,
    epoch: Instant,
    /// Nanoseconds after `epoch` at which the running statement is
    /// interrupted; `0` disarms the check.
    deadline: Arc<AtomicU64>,
}

impl SqliteStore {
    /// Opens `location` (`:memory:` for an in-memory database).
    ///
    /// # Errors
    /// - `Connection` when the location is empty, unreachable, or the
    ///   connection cannot be configured.
    ///
    /// # Side effects
    /// - Emits `adapter_open` logging events with duration and status.
    pub fn open(location: &str, config: &AdapterConfig) -> OrmResult<Self> {
        let started_at = Instant::now();
        let mode = if location == MEMORY_LOCATION {
            "memory"
        } else {
            "file"
        };
        info!("event=adapter_open module=db status=start mode={mode}");

        let opened = if location.trim().is_empty() {
            Err(OrmError::Connection("location must not be empty".into()))
        } else if mode == "memory" {
            Connection::open_in_memory().map_err(|err| OrmError::Connection(err.to_string()))
        } else {
            Connection::open_with_flags(
                location,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|err| OrmError::Connection(format!("cannot open `{location}`: {err}")))
        };

        let conn = match opened {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=adapter_open module=db status=error mode={mode} duration_ms={} error_code=open_failed error={err}",
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        let mut store = Self {
            conn,
            location: location.to_string(),
            statement_timeout: config.statement_timeout(),
            epoch: Instant::now(),
            deadline: Arc::new(AtomicU64::new(0)),
        };

        match store.bootstrap(config) {
            Ok(()) => {
                info!(
                    "event=adapter_open module=db status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(store)
            }
            Err(err) => {
                error!(
                    "event=adapter_open module=db status=error mode={mode} duration_ms={} error_code=bootstrap_failed error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(OrmError::Connection(err.to_string()))
            }
        }
    }

    fn bootstrap(&mut self, config: &AdapterConfig) -> rusqlite::Result<()> {
        self.conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        self.conn.busy_timeout(config.busy_timeout())?;
        if let Some(mode) = config.journal_mode {
            let _: String = self.conn.query_row(
                &format!("PRAGMA journal_mode = {};", mode.as_sql()),
                [],
                |row| row.get(0),
            )?;
        }
        if self.statement_timeout.is_some() {
            let epoch = self.epoch;
            let deadline = Arc::clone(&self.deadline);
            self.conn.progress_handler(
                PROGRESS_CHECK_OPS,
                Some(move || {
                    let limit = deadline.load(Ordering::Relaxed);
                    limit != 0 && epoch.elapsed().as_nanos() as u64 >= limit
                }),
            );
        }
        Ok(())
    }

    fn arm_deadline(&self) {
        if let Some(timeout) = self.statement_timeout {
            let limit = (self.epoch.elapsed() + timeout).as_nanos() as u64;
            self.deadline.store(limit.max(1), Ordering::Relaxed);
        }
    }

    fn disarm_deadline(&self) {
        self.deadline.store(0, Ordering::Relaxed);
    }

    fn batch(&mut self, sql: &str) -> OrmResult<()> {
        self.conn.execute_batch(sql).map_err(classify)
    }
}

impl Store for SqliteStore {
    fn execute(&mut self, sql: &str, params: &[Value]) -> OrmResult<StatementOutcome> {
        let started_at = Instant::now();
        self.arm_deadline();
        let result = run_statement(&self.conn, sql, params);
        self.disarm_deadline();

        match result {
            Ok(outcome) => {
                debug!(
                    "event=statement module=db status=ok duration_ms={} params={} rows={} rows_affected={}",
                    started_at.elapsed().as_millis(),
                    params.len(),
                    outcome.rows.len(),
                    outcome.rows_affected
                );
                Ok(outcome)
            }
            Err(err) => {
                let err = classify(err);
                debug!(
                    "event=statement module=db status=error duration_ms={} error_code={}",
                    started_at.elapsed().as_millis(),
                    err.code()
                );
                Err(err)
            }
        }
    }

    fn begin(&mut self) -> OrmResult<()> {
        self.batch("BEGIN;")
    }

    fn commit(&mut self) -> OrmResult<()> {
        self.batch("COMMIT;")
    }

    fn rollback(&mut self) -> OrmResult<()> {
        self.batch("ROLLBACK;")
    }

    fn table_exists(&mut self, table: &str) -> OrmResult<bool> {
        let exists: i64 = self
            .conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1
                    FROM sqlite_master
                    WHERE type = 'table' AND name = ?1
                );",
                [table],
                |row| row.get(0),
            )
            .map_err(classify)?;
        Ok(exists == 1)
    }

    fn location(&self) -> &str {
        &self.location
    }
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> rusqlite::Result<StatementOutcome> {
    let mut stmt = conn.prepare(sql)?;
    let column_count = stmt.column_count();

    if column_count == 0 {
        let rows_affected = stmt.execute(params_from_iter(params.iter()))?;
        return Ok(StatementOutcome {
            rows_affected,
            rows: Vec::new(),
            last_insert_id: Some(conn.last_insert_rowid()),
        });
    }

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for index in 0..column_count {
            let value =
                Value::from_value_ref(row.get_ref(index)?).map_err(rusqlite::Error::Utf8Error)?;
            values.push(value);
        }
        collected.push(values);
    }

    Ok(StatementOutcome {
        rows_affected: 0,
        rows: collected,
        last_insert_id: None,
    })
}

fn classify(err: rusqlite::Error) -> OrmError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => OrmError::ConstraintViolation(err.to_string()),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            OrmError::Connection(format!("timed out waiting for database lock: {err}"))
        }
        Some(ErrorCode::OperationInterrupted) => {
            OrmError::Query(format!("statement exceeded its timeout: {err}"))
        }
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => {
            OrmError::Connection(err.to_string())
        }
        _ => OrmError::Query(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::db::{AdapterConfig, Store};
    use crate::error::OrmError;
    use crate::value::Value;

    #[test]
    fn execute_reports_rows_and_affected_counts() {
        let mut store = SqliteStore::open(":memory:", &AdapterConfig::default()).unwrap();
        store
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE)", &[])
            .unwrap();
        let inserted = store
            .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        assert_eq!(inserted.rows_affected, 1);
        assert_eq!(inserted.last_insert_id, Some(1));

        let selected = store.execute("SELECT id, name FROM t", &[]).unwrap();
        assert_eq!(
            selected.rows,
            vec![vec![Value::Integer(1), Value::Text("a".into())]]
        );
        assert!(store.table_exists("t").unwrap());
        assert!(!store.table_exists("missing").unwrap());
    }

    #[test]
    fn constraint_failures_are_classified() {
        let mut store = SqliteStore::open(":memory:", &AdapterConfig::default()).unwrap();
        store
            .execute("CREATE TABLE t (name TEXT UNIQUE)", &[])
            .unwrap();
        store
            .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        let err = store
            .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("a")])
            .unwrap_err();
        assert!(matches!(err, OrmError::ConstraintViolation(_)));

        let err = store.execute("SELECT * FROM nowhere", &[]).unwrap_err();
        assert!(matches!(err, OrmError::Query(_)));
    }

    #[test]
    fn unreachable_location_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("db.sqlite3");
        let err = SqliteStore::open(path.to_str().unwrap(), &AdapterConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::Connection(_)));
    }

    #[test]
    fn statement_timeout_interrupts_long_queries() {
        let config = AdapterConfig {
            statement_timeout_ms: Some(20),
            ..AdapterConfig::default()
        };
        let mut store = SqliteStore::open(":memory:", &config).unwrap();
        let err = store
            .execute(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                 SELECT COUNT(*) FROM n",
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, OrmError::Query(message) if message.contains("timeout")));
    }
}
