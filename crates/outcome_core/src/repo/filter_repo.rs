//! Course filter repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist course-scoped filters and their criteria.
//! - Replace a course's filters wholesale (`sync`).
//!
//! # Invariants
//! - `criteria` is stored as a JSON array of `FilterCriterion`.
//! - `sync` never touches other courses and runs in one immediate
//!   transaction.

use super::{ensure_connection_ready, in_write_scope, EntityKind, RepoError, RepoResult};
use crate::model::filter::{Filter, FilterCriterion};
use crate::model::{CourseId, FilterId, OutcomeSetId};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, TransactionBehavior};

const FILTER_SELECT_SQL: &str = "SELECT
    id,
    course_id,
    outcome_set_id,
    criteria
FROM outcome_filters";

/// Query options for listing filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    pub course_id: Option<CourseId>,
    pub outcome_set_id: Option<OutcomeSetId>,
}

/// Repository interface for course filters.
pub trait FilterRepository {
    fn find(&self, id: FilterId) -> RepoResult<Option<Filter>>;
    /// Lists filters matching the query, ordered by id.
    fn find_by(&self, query: &FilterQuery) -> RepoResult<Vec<Filter>>;
    /// Lists every filter of one course.
    fn find_by_course(&self, course_id: CourseId) -> RepoResult<Vec<Filter>>;
    /// Inserts or updates one filter and returns its id.
    fn save(&self, filter: &mut Filter) -> RepoResult<FilterId>;
    /// Deletes one filter. Unsaved or already deleted filters are ignored.
    fn remove(&self, filter: &Filter) -> RepoResult<()>;
    /// Replaces all filters of the course with `filters`.
    ///
    /// Each stored copy is stamped with `course_id`; the persisted filters are
    /// returned with their new ids.
    fn sync(&self, course_id: CourseId, filters: &[Filter]) -> RepoResult<Vec<Filter>>;
    /// Deletes all filters of the course and returns how many were removed.
    fn remove_by_course(&self, course_id: CourseId) -> RepoResult<usize>;
}

/// SQLite-backed course filter repository.
pub struct SqliteFilterRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteFilterRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl FilterRepository for SqliteFilterRepository<'_> {
    fn find(&self, id: FilterId) -> RepoResult<Option<Filter>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{FILTER_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_filter_row(row)?));
        }
        Ok(None)
    }

    fn find_by(&self, query: &FilterQuery) -> RepoResult<Vec<Filter>> {
        let mut sql = format!("{FILTER_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(course_id) = query.course_id {
            sql.push_str(" AND course_id = ?");
            bind_values.push(Value::Integer(course_id));
        }
        if let Some(outcome_set_id) = query.outcome_set_id {
            sql.push_str(" AND outcome_set_id = ?");
            bind_values.push(Value::Integer(outcome_set_id));
        }
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut filters = Vec::new();
        while let Some(row) = rows.next()? {
            filters.push(parse_filter_row(row)?);
        }
        Ok(filters)
    }

    fn find_by_course(&self, course_id: CourseId) -> RepoResult<Vec<Filter>> {
        self.find_by(&FilterQuery {
            course_id: Some(course_id),
            ..FilterQuery::default()
        })
    }

    fn save(&self, filter: &mut Filter) -> RepoResult<FilterId> {
        filter.normalize_criteria();
        filter.validate()?;
        let criteria = encode_criteria(&filter.criteria)?;

        match filter.id {
            None => {
                let id = insert_filter(self.conn, filter, &criteria)?;
                filter.id = Some(id);
                Ok(id)
            }
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE outcome_filters
                     SET
                        course_id = ?1,
                        outcome_set_id = ?2,
                        criteria = ?3,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE id = ?4;",
                    params![filter.course_id, filter.outcome_set_id, criteria, id],
                )?;
                if changed == 0 {
                    return Err(RepoError::NotFound {
                        entity: EntityKind::Filter,
                        id,
                    });
                }
                Ok(id)
            }
        }
    }

    fn remove(&self, filter: &Filter) -> RepoResult<()> {
        if let Some(id) = filter.id {
            self.conn
                .execute("DELETE FROM outcome_filters WHERE id = ?1;", [id])?;
        }
        Ok(())
    }

    fn sync(&self, course_id: CourseId, filters: &[Filter]) -> RepoResult<Vec<Filter>> {
        let mut stamped = Vec::with_capacity(filters.len());
        for filter in filters {
            let mut copy = filter.clone();
            copy.id = None;
            copy.course_id = course_id;
            copy.normalize_criteria();
            copy.validate()?;
            stamped.push(copy);
        }

        let removed = in_write_scope(self.conn, TransactionBehavior::Immediate, |conn| {
            let removed = conn.execute(
                "DELETE FROM outcome_filters WHERE course_id = ?1;",
                [course_id],
            )?;
            for filter in &mut stamped {
                let criteria = encode_criteria(&filter.criteria)?;
                filter.id = Some(insert_filter(conn, filter, &criteria)?);
            }
            Ok(removed)
        })?;

        info!(
            "event=filters_sync module=repo status=ok course_id={} removed={} inserted={}",
            course_id,
            removed,
            stamped.len()
        );
        Ok(stamped)
    }

    fn remove_by_course(&self, course_id: CourseId) -> RepoResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM outcome_filters WHERE course_id = ?1;",
            [course_id],
        )?;
        Ok(removed)
    }
}

fn insert_filter(conn: &Connection, filter: &Filter, criteria: &str) -> RepoResult<FilterId> {
    conn.execute(
        "INSERT INTO outcome_filters (course_id, outcome_set_id, criteria)
         VALUES (?1, ?2, ?3);",
        params![filter.course_id, filter.outcome_set_id, criteria],
    )?;
    Ok(conn.last_insert_rowid())
}

fn encode_criteria(criteria: &[FilterCriterion]) -> RepoResult<String> {
    serde_json::to_string(criteria)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode filter criteria: {err}")))
}

fn parse_filter_row(row: &Row<'_>) -> RepoResult<Filter> {
    let id: FilterId = row.get("id")?;
    let criteria_text: String = row.get("criteria")?;
    let criteria: Vec<FilterCriterion> = serde_json::from_str(&criteria_text).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid criteria JSON in outcome_filters.criteria for filter {id}: {err}"
        ))
    })?;

    Ok(Filter {
        id: Some(id),
        course_id: row.get("course_id")?,
        outcome_set_id: row.get("outcome_set_id")?,
        criteria,
    })
}
