//! Transaction scope for mapper use-cases.
//!
//! # Invariants
//! - `write` work either commits as a whole or leaves storage unchanged.
//! - Work started while a transaction is already open joins it; the outer
//!   scope owns commit and rollback.

use crate::repo::RepoError;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Runs a group of repository calls as one unit.
pub trait UnitOfWork {
    /// Runs read-only work against one consistent snapshot.
    fn read<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce() -> Result<T, E>,
        E: From<RepoError>;

    /// Runs mutating work atomically. An `Err` from `work` undoes every
    /// write it made.
    fn write<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce() -> Result<T, E>,
        E: From<RepoError>;
}

/// Unit of work over the connection shared by the SQLite repositories.
pub struct SqliteUnitOfWork<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUnitOfWork<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn scoped<T, E, W>(&self, behavior: TransactionBehavior, work: W) -> Result<T, E>
    where
        W: FnOnce() -> Result<T, E>,
        E: From<RepoError>,
    {
        if !self.conn.is_autocommit() {
            return work();
        }
        let tx = Transaction::new_unchecked(self.conn, behavior)
            .map_err(|err| E::from(RepoError::from(err)))?;
        // Dropping `tx` on the error path rolls back.
        let value = work()?;
        tx.commit().map_err(|err| E::from(RepoError::from(err)))?;
        Ok(value)
    }
}

impl UnitOfWork for SqliteUnitOfWork<'_> {
    fn read<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce() -> Result<T, E>,
        E: From<RepoError>,
    {
        self.scoped(TransactionBehavior::Deferred, work)
    }

    fn write<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce() -> Result<T, E>,
        E: From<RepoError>,
    {
        self.scoped(TransactionBehavior::Immediate, work)
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteUnitOfWork, UnitOfWork};
    use crate::db::open_db_in_memory;
    use crate::repo::RepoError;

    fn count(conn: &rusqlite::Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM outcome_sets;", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn failed_write_leaves_no_rows() {
        let conn = open_db_in_memory().unwrap();
        let unit = SqliteUnitOfWork::new(&conn);

        let result: Result<(), RepoError> = unit.write(|| {
            conn.execute("INSERT INTO outcome_sets (idnumber, name) VALUES ('math', 'Math');", [])?;
            Err(RepoError::InvalidData("stop".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(count(&conn), 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn nested_work_joins_outer_scope() {
        let conn = open_db_in_memory().unwrap();
        let unit = SqliteUnitOfWork::new(&conn);

        let result: Result<(), RepoError> = unit.write(|| {
            unit.write(|| {
                conn.execute("INSERT INTO outcome_sets (idnumber, name) VALUES ('math', 'Math');", [])?;
                Ok::<(), RepoError>(())
            })?;
            assert!(!conn.is_autocommit());
            Err(RepoError::InvalidData("stop".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn successful_write_commits() {
        let conn = open_db_in_memory().unwrap();
        let unit = SqliteUnitOfWork::new(&conn);

        unit.write(|| {
            conn.execute("INSERT INTO outcome_sets (idnumber, name) VALUES ('math', 'Math');", [])?;
            Ok::<(), RepoError>(())
        })
        .unwrap();

        assert_eq!(count(&conn), 1);
    }
}
