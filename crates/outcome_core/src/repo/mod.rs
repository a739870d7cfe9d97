//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define one persistence contract per entity kind (areas, outcomes,
//!   outcome sets, course filters).
//! - Isolate SQL details from the mapper service.
//!
//! # Invariants
//! - Repository writes run `validate()` on the record before any SQL.
//! - Repositories hold no business rules; the area/mapping existence rule is
//!   enforced by the mapper service.
//! - Repository APIs return semantic errors (`NotFound`, `Unsaved`) in
//!   addition to DB transport errors.

pub mod area_repo;
pub mod filter_repo;
pub mod outcome_repo;
pub mod outcome_set_repo;

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::ModelValidationError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Entity kind named by repository errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Area,
    Outcome,
    OutcomeSet,
    Filter,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Area => "area",
            Self::Outcome => "outcome",
            Self::OutcomeSet => "outcome set",
            Self::Filter => "filter",
        };
        f.write_str(name)
    }
}

/// Error for persistence and query operations on outcome data.
#[derive(Debug)]
pub enum RepoError {
    /// Record failed field-level validation.
    Validation(ModelValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target row does not exist.
    NotFound { entity: EntityKind, id: i64 },
    /// Operation needs a persisted record but got one without an id.
    Unsaved(EntityKind),
    /// Attempt to rewrite a record that only supports soft deletion.
    Immutable { entity: EntityKind, id: i64 },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Unsaved(entity) => write!(f, "{entity} has not been saved yet"),
            Self::Immutable { entity, id } => {
                write!(f, "{entity} {id} is immutable once created")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "outcome repositories require schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted outcome data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelValidationError> for RepoError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Rejects connections that were not opened through `db::open_db*`.
pub(crate) fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

/// Runs `write` atomically on `conn`.
///
/// Opens a transaction with `behavior` when the connection is in autocommit
/// mode; otherwise joins the caller's open transaction, which then owns
/// commit and rollback.
pub(crate) fn in_write_scope<T, F>(
    conn: &Connection,
    behavior: TransactionBehavior,
    write: F,
) -> RepoResult<T>
where
    F: FnOnce(&Connection) -> RepoResult<T>,
{
    if !conn.is_autocommit() {
        return write(conn);
    }
    let tx = Transaction::new_unchecked(conn, behavior)?;
    let value = write(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

/// Builds `?, ?, ?` for an `IN (...)` clause with `count` bind slots.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
