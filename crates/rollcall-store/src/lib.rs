//! SQLite persistence for rollcall.
//!
//! One [`Store`] wraps one connection behind a mutex. Every multi-statement
//! write runs in an immediate transaction, so two daemons pointed at the same
//! database file still serialize their attendance transitions.

mod attendance;
mod embeddings;
mod employees;
mod logs;
pub mod model;
pub mod schema;

pub use model::{
    AttendanceEntry, AttendanceFilter, AttendanceRecord, AttendanceStatus, AttendanceWrite,
    DailySummary, DayTrend, EmbeddingRecord, Employee, EmployeeStatus, EmployeeSummary,
    NewEmbedding, NewEmployee, NewRecognitionLog, RecognitionLogEntry, RecognitionStatus,
    RemovedEmbedding, UnknownVariant,
};

use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("employee code already exists: {0}")]
    DuplicateCode(String),

    #[error("employee not found: {0}")]
    EmployeeNotFound(String),

    #[error("employee {employee_id} already has the maximum of {max} face embeddings")]
    QuotaExceeded { employee_id: i64, max: usize },

    #[error("face embedding {encoding_id} is the last one of employee {employee_id}")]
    LastEmbedding { employee_id: i64, encoding_id: i64 },

    #[error("invalid write: {0}")]
    Invalid(String),

    #[error("database corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

pub struct Store {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database file at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::apply(&conn)?;
        tracing::info!(path = %path.display(), "attendance database opened");

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.lock()?;
        Ok(schema::version(&conn)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

/// Local wall-clock time, the zone every stored timestamp is in.
fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
