//! Outcome set repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Outcome sets are soft-deleted; deleted sets are hidden from area and
//!   course lookups.
//! - "Used by a course" means referenced by at least one of its filters.

use super::{
    bool_to_int, ensure_connection_ready, int_to_bool, EntityKind, RepoError, RepoResult,
};
use crate::model::area::Area;
use crate::model::outcome_set::OutcomeSet;
use crate::model::{CourseId, OutcomeSetId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeMap;

const OUTCOME_SET_COLUMNS_SQL: &str = "s.id,
    s.idnumber,
    s.name,
    s.description,
    s.provider,
    s.region,
    s.deleted";

/// Query options for listing outcome sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeSetQuery {
    pub idnumber: Option<String>,
    pub provider: Option<String>,
    pub include_deleted: bool,
}

/// Repository interface for outcome sets.
pub trait OutcomeSetRepository {
    /// Gets one outcome set by id, including soft-deleted ones.
    fn find(&self, id: OutcomeSetId) -> RepoResult<Option<OutcomeSet>>;
    /// Lists outcome sets matching the query, ordered by name.
    fn find_by(&self, query: &OutcomeSetQuery) -> RepoResult<Vec<OutcomeSet>>;
    /// Lists active sets owning at least one outcome linked to the area.
    fn find_by_area(&self, area: &Area) -> RepoResult<Vec<OutcomeSet>>;
    /// Returns active sets referenced by the course's filters, keyed by id.
    fn find_used_by_course(
        &self,
        course_id: CourseId,
    ) -> RepoResult<BTreeMap<OutcomeSetId, OutcomeSet>>;
    /// Inserts or updates the outcome set and returns its id.
    fn save(&self, outcome_set: &mut OutcomeSet) -> RepoResult<OutcomeSetId>;
    /// Soft-deletes the outcome set.
    fn remove(&self, id: OutcomeSetId) -> RepoResult<()>;
}

/// SQLite-backed outcome set repository.
pub struct SqliteOutcomeSetRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOutcomeSetRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn query_sets(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<OutcomeSet>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut sets = Vec::new();
        while let Some(row) = rows.next()? {
            sets.push(parse_outcome_set_row(row)?);
        }
        Ok(sets)
    }
}

impl OutcomeSetRepository for SqliteOutcomeSetRepository<'_> {
    fn find(&self, id: OutcomeSetId) -> RepoResult<Option<OutcomeSet>> {
        let sql = format!("SELECT {OUTCOME_SET_COLUMNS_SQL} FROM outcome_sets s WHERE s.id = ?;");
        Ok(self
            .query_sets(&sql, vec![Value::Integer(id)])?
            .into_iter()
            .next())
    }

    fn find_by(&self, query: &OutcomeSetQuery) -> RepoResult<Vec<OutcomeSet>> {
        let mut sql = format!("SELECT {OUTCOME_SET_COLUMNS_SQL} FROM outcome_sets s WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND s.deleted = 0");
        }
        if let Some(idnumber) = query.idnumber.as_ref() {
            sql.push_str(" AND s.idnumber = ?");
            bind_values.push(Value::Text(idnumber.clone()));
        }
        if let Some(provider) = query.provider.as_ref() {
            sql.push_str(" AND s.provider = ?");
            bind_values.push(Value::Text(provider.clone()));
        }
        sql.push_str(" ORDER BY s.name ASC, s.id ASC");

        self.query_sets(&sql, bind_values)
    }

    fn find_by_area(&self, area: &Area) -> RepoResult<Vec<OutcomeSet>> {
        let Some(area_id) = area.id else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT DISTINCT {OUTCOME_SET_COLUMNS_SQL}
             FROM outcome_sets s
             INNER JOIN outcomes o ON o.outcome_set_id = s.id
             INNER JOIN outcome_area_outcomes ao ON ao.outcome_id = o.id
             WHERE ao.area_id = ?
               AND s.deleted = 0
             ORDER BY s.name ASC, s.id ASC;"
        );
        self.query_sets(&sql, vec![Value::Integer(area_id)])
    }

    fn find_used_by_course(
        &self,
        course_id: CourseId,
    ) -> RepoResult<BTreeMap<OutcomeSetId, OutcomeSet>> {
        let sql = format!(
            "SELECT {OUTCOME_SET_COLUMNS_SQL}
             FROM outcome_sets s
             WHERE s.deleted = 0
               AND EXISTS (
                   SELECT 1
                   FROM outcome_filters f
                   WHERE f.outcome_set_id = s.id
                     AND f.course_id = ?
               )
             ORDER BY s.id ASC;"
        );
        let sets = self.query_sets(&sql, vec![Value::Integer(course_id)])?;
        Ok(sets
            .into_iter()
            .filter_map(|set| set.id.map(|id| (id, set)))
            .collect())
    }

    fn save(&self, outcome_set: &mut OutcomeSet) -> RepoResult<OutcomeSetId> {
        outcome_set.validate()?;

        match outcome_set.id {
            None => {
                self.conn.execute(
                    "INSERT INTO outcome_sets (
                        idnumber,
                        name,
                        description,
                        provider,
                        region,
                        deleted
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                    params![
                        outcome_set.idnumber.as_str(),
                        outcome_set.name.as_str(),
                        outcome_set.description.as_deref(),
                        outcome_set.provider.as_deref(),
                        outcome_set.region.as_deref(),
                        bool_to_int(outcome_set.deleted),
                    ],
                )?;
                let id = self.conn.last_insert_rowid();
                outcome_set.id = Some(id);
                Ok(id)
            }
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE outcome_sets
                     SET
                        idnumber = ?1,
                        name = ?2,
                        description = ?3,
                        provider = ?4,
                        region = ?5,
                        deleted = ?6,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE id = ?7;",
                    params![
                        outcome_set.idnumber.as_str(),
                        outcome_set.name.as_str(),
                        outcome_set.description.as_deref(),
                        outcome_set.provider.as_deref(),
                        outcome_set.region.as_deref(),
                        bool_to_int(outcome_set.deleted),
                        id,
                    ],
                )?;
                if changed == 0 {
                    return Err(RepoError::NotFound {
                        entity: EntityKind::OutcomeSet,
                        id,
                    });
                }
                Ok(id)
            }
        }
    }

    fn remove(&self, id: OutcomeSetId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE outcome_sets
             SET
                deleted = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: EntityKind::OutcomeSet,
                id,
            });
        }
        Ok(())
    }
}

fn parse_outcome_set_row(row: &Row<'_>) -> RepoResult<OutcomeSet> {
    Ok(OutcomeSet {
        id: Some(row.get("id")?),
        idnumber: row.get("idnumber")?,
        name: row.get("name")?,
        description: row.get("description")?,
        provider: row.get("provider")?,
        region: row.get("region")?,
        deleted: int_to_bool(row.get("deleted")?, "outcome_sets.deleted")?,
    })
}
