//! SQLite storage bootstrap for the outcome mapping core.
//!
//! # Responsibility
//! - Open and configure connections used by the outcome repositories.
//! - Apply schema migrations before any repository touches the data.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - A database written by a newer binary is never opened for writes.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage bootstrap error.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// A bundled schema file failed to apply. Earlier pending files in the
    /// same run are rolled back with it.
    Migration {
        version: u32,
        file: &'static str,
        tables: &'static [&'static str],
        source: rusqlite::Error,
    },
    /// The file was migrated by a newer build of the outcome tables.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Migration {
                version,
                file,
                tables,
                source,
            } => write!(
                f,
                "outcome schema migration {version} ({file}) failed for tables [{}]: {source}",
                tables.join(", ")
            ),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "outcome tables are at schema version {db_version}, this build supports up to {latest_supported}; refusing to open"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Migration { source: err, .. } => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

#[cfg(test)]
mod tests {
    use super::DbError;

    #[test]
    fn newer_schema_message_names_both_versions() {
        let message = DbError::UnsupportedSchemaVersion {
            db_version: 7,
            latest_supported: 3,
        }
        .to_string();
        assert!(message.contains("outcome tables"));
        assert!(message.contains('7'));
        assert!(message.contains('3'));
    }
}
