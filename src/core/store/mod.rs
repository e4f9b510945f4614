//! SQLite-backed system of record
//!
//! The store owns one SQLite connection and exposes the MES operations as
//! methods, split by concern across the submodules:
//! - `parts`: part definition catalog and serializable part registry
//! - `products`: products and their work instruction associations
//! - `work_instructions`: version chains, nodes and editability
//! - `production_logs`: logs, steps, attempts and submission
//! - `traceability`: the insert-only part ledger and lineage queries
//! - `reports`: reporting views and raw read-only queries
//!
//! Every mutating call runs in its own transaction and commits before it
//! returns. Read helpers (`get_*`, `list_*`, `find_*`) log failures and
//! return an empty value instead of an error.

mod parts;
mod production_logs;
mod products;
mod reports;
mod schema;
mod traceability;
mod work_instructions;

pub use reports::{summarize_yield, FpyRow, ProductionRow, StepYield, StoreStats, TraceabilityRow};
pub use work_instructions::WorkInstructionFilter;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use miette::Diagnostic;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use crate::core::events::{LogEvent, LogEvents};
use crate::core::identity::WorkInstructionId;
use crate::core::project::Project;

/// Database file location within a project
pub const DB_FILE: &str = ".mes/mes.db";

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// Errors raised by store operations
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("database error: {0}")]
    #[diagnostic(code(mes::store::sqlite))]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(mes::store::io))]
    Io(#[from] std::io::Error),

    #[error("database schema version {found} does not match expected version {expected}")]
    #[diagnostic(
        code(mes::store::schema_mismatch),
        help("this database was written by a different release of mes")
    )]
    SchemaMismatch { found: i32, expected: i32 },

    #[error("{kind} {id} not found")]
    #[diagnostic(code(mes::store::not_found))]
    NotFound { kind: &'static str, id: String },

    #[error("work instruction {0} has production logs and cannot be edited")]
    #[diagnostic(
        code(mes::store::not_editable),
        help("create a new version of the work instruction instead")
    )]
    NotEditable(WorkInstructionId),

    #[error("work instruction {0} is not the latest version of its chain")]
    #[diagnostic(
        code(mes::store::not_latest),
        help("only the latest version of a chain can be activated")
    )]
    NotLatest(WorkInstructionId),

    #[error("{kind} {id} is referenced by {count} {referenced_by}")]
    #[diagnostic(code(mes::store::in_use))]
    InUse {
        kind: &'static str,
        id: String,
        count: i64,
        referenced_by: &'static str,
    },

    #[error("only {logged} of {required} required parts were logged")]
    #[diagnostic(
        code(mes::store::confirmation_required),
        help("confirm the submission to record the log anyway")
    )]
    ConfirmationRequired { logged: usize, required: usize },

    #[error("a serial number is required for {part}")]
    #[diagnostic(code(mes::store::missing_serial))]
    MissingSerial { part: String },

    #[error("invalid input: {0}")]
    #[diagnostic(code(mes::store::invalid))]
    Invalid(String),

    #[error("only SELECT statements may be run as raw queries")]
    #[diagnostic(code(mes::store::read_only))]
    ReadOnlyQuery,
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// The MES database
pub struct Store {
    conn: Connection,
    events: LogEvents,
    path: Option<PathBuf>,
}

impl Store {
    /// Open the project's database, creating it on first use
    pub fn open(project: &Project) -> Result<Self, StoreError> {
        Self::open_path(&project.database_path())
    }

    /// Open or create a database file
    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL for concurrent readers while a unit of work commits
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        tracing::debug!(path = %path.display(), "opened database");
        let mut store = Self::from_connection(conn)?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Fresh in-memory database (tests and dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut store = Self {
            conn,
            events: LogEvents::default(),
            path: None,
        };

        match store.schema_version()? {
            None => store.init_schema()?,
            Some(found) if found != SCHEMA_VERSION => {
                return Err(StoreError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                })
            }
            Some(_) => {}
        }

        Ok(store)
    }

    /// Installed schema version, `None` for an empty database
    fn schema_version(&self) -> Result<Option<i32>, StoreError> {
        let has_table: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            return Ok(None);
        }

        let version = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(version)
    }

    /// Database file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Event notifier for changes made through this store
    pub fn events(&self) -> &LogEvents {
        &self.events
    }

    /// Share a notifier with other stores
    pub fn with_events(mut self, events: LogEvents) -> Self {
        self.events = events;
        self
    }

    fn publish(&self, event: LogEvent) {
        self.events.publish(event);
    }
}

/// Catch-log-return-default for read helpers
fn logged<T: Default>(context: &str, result: Result<T, StoreError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "{} failed", context);
            T::default()
        }
    }
}

/// Timestamp format used in every TEXT time column (sortable)
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests;
