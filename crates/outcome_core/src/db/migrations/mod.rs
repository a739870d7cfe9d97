//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register outcome schema migrations in strictly increasing order.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.

use crate::db::{DbError, DbResult};
use log::{info, warn};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    file: &'static str,
    /// Tables created by this file, reported when it fails.
    tables: &'static [&'static str],
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        file: "0001_outcomes.sql",
        tables: &[
            "outcome_sets",
            "outcomes",
            "outcome_edulevels",
            "outcome_subjects",
        ],
        sql: include_str!("0001_outcomes.sql"),
    },
    Migration {
        version: 2,
        file: "0002_areas.sql",
        tables: &["outcome_areas", "outcome_area_outcomes"],
        sql: include_str!("0002_areas.sql"),
    },
    Migration {
        version: 3,
        file: "0003_course_filters.sql",
        tables: &["outcome_filters"],
        sql: include_str!("0003_course_filters.sql"),
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS
        .iter()
        .filter(|migration| migration.version > current_version)
    {
        tx.execute_batch(migration.sql)
            .and_then(|()| {
                tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))
            })
            .map_err(|source| {
                warn!(
                    "event=db_migrate module=db status=error version={} file={}",
                    migration.version, migration.file
                );
                DbError::Migration {
                    version: migration.version,
                    file: migration.file,
                    tables: migration.tables,
                    source,
                }
            })?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        current_version, latest
    );
    Ok(())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
