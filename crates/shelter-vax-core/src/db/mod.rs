//! Database layer for shelter-vax.
//!
//! Engine code never touches the connection directly: every read-modify-write
//! goes through a [`StoreTx`] obtained from [`Database::with_transaction`] or
//! [`Database::with_read_transaction`], so the transactional boundary is
//! visible in the signatures.

mod schema;
mod catalog;
mod doses;
mod protocols;

pub use schema::*;
pub use protocols::{ProtocolFilter, ProtocolSort};

use rusqlite::{ffi, Connection, ErrorCode, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default time a connection waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

impl DbError {
    /// Serialization failures that a retry of the whole transaction can cure:
    /// writer-lock contention and a lost race on the active-protocol index.
    pub fn is_conflict(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) || err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open database at path with an explicit busy timeout.
    ///
    /// File databases run in WAL mode so readers never block the writer.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Change how long this connection waits on a locked database.
    pub fn set_busy_timeout(&self, timeout: Duration) -> DbResult<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Run `f` inside an immediate (writer-locked) transaction.
    ///
    /// Commits when `f` returns `Ok`; any `Err` drops the transaction, which
    /// rolls back every write made through the handle.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<DbError>,
    {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside a deferred transaction, giving it one consistent
    /// snapshot for all of its reads.
    pub fn with_read_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<DbError>,
    {
        let tx = self.begin(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn begin(&self, behavior: TransactionBehavior) -> DbResult<StoreTx<'_>> {
        let tx = Transaction::new_unchecked(&self.conn, behavior)?;
        Ok(StoreTx { tx })
    }
}

/// Handle for one open transaction. All protocol and dose operations take
/// this handle, never a bare connection.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> StoreTx<'conn> {
    fn conn(&self) -> &Connection {
        &self.tx
    }

    fn commit(self) -> DbResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        // Check that tables exist
        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"animals".to_string()));
        assert!(tables.contains(&"vaccines".to_string()));
        assert!(tables.contains(&"vaccination_protocols".to_string()));
        assert!(tables.contains(&"dose_records".to_string()));
    }

    #[test]
    fn test_open_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("shelter.db")).unwrap();

        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        let result: DbResult<()> = db.with_transaction(|tx| {
            tx.conn().execute(
                "INSERT INTO vaccines (id, name, created_at, updated_at) VALUES ('v1', 'V4', '2024-01-01', '2024-01-01')",
                [],
            )?;
            Err(DbError::Constraint("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM vaccines", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
