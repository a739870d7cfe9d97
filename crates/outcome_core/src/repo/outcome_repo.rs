//! Outcome repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Load outcomes together with their edu level and subject tags.
//! - Answer the area-scoped lookups the mapper service needs.
//!
//! # Invariants
//! - Tags are loaded eagerly with every outcome; there is no lazy fetch.
//! - Outcomes are never hard-deleted; `remove` sets the tombstone.
//! - Persisted outcomes are immutable through `save`.

use super::{
    bool_to_int, ensure_connection_ready, in_write_scope, int_to_bool, placeholders, EntityKind,
    RepoError, RepoResult,
};
use crate::model::area::Area;
use crate::model::filter::Filter;
use crate::model::outcome::Outcome;
use crate::model::{OutcomeId, OutcomeSetId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, TransactionBehavior};
use std::collections::BTreeMap;

const OUTCOME_COLUMNS_SQL: &str = "o.id,
    o.outcome_set_id,
    o.parent_id,
    o.idnumber,
    o.docnum,
    o.description,
    o.assessable,
    o.deleted,
    o.sort_order";

const OUTCOME_ORDER_SQL: &str = " ORDER BY o.sort_order ASC, o.id ASC";

/// Query options for listing outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeQuery {
    pub outcome_set_id: Option<OutcomeSetId>,
    pub idnumber: Option<String>,
    /// Soft-deleted rows are hidden unless set.
    pub include_deleted: bool,
    /// Restrict to `assessable = 1`.
    pub assessable_only: bool,
}

/// Repository interface for outcomes.
pub trait OutcomeRepository {
    /// Gets one outcome by id, including soft-deleted ones.
    fn find(&self, id: OutcomeId) -> RepoResult<Option<Outcome>>;
    /// Gets outcomes by id. Unknown ids are omitted from the result.
    fn find_by_ids(&self, ids: &[OutcomeId]) -> RepoResult<Vec<Outcome>>;
    /// Lists outcomes matching the query.
    fn find_by(&self, query: &OutcomeQuery) -> RepoResult<Vec<Outcome>>;
    /// Lists the active outcomes of one outcome set.
    fn find_by_outcome_set(&self, outcome_set_id: OutcomeSetId) -> RepoResult<Vec<Outcome>>;
    /// Lists every outcome linked to the area, whatever its state.
    fn find_by_area(&self, area: &Area) -> RepoResult<Vec<Outcome>>;
    /// Lists outcomes linked to the area that pass the course filter.
    fn find_by_area_and_filter(&self, area: &Area, filter: &Filter) -> RepoResult<Vec<Outcome>>;
    /// Lists linked outcomes per item id of one component area.
    ///
    /// Item ids without any linked outcome are absent from the map.
    fn find_by_area_item_ids(
        &self,
        component: &str,
        area: &str,
        item_ids: &[i64],
    ) -> RepoResult<BTreeMap<i64, Vec<Outcome>>>;
    /// Inserts a new outcome with its tags and returns its id.
    fn save(&self, outcome: &mut Outcome) -> RepoResult<OutcomeId>;
    /// Soft-deletes an outcome. Repeating the call is a no-op.
    fn remove(&self, id: OutcomeId) -> RepoResult<()>;
}

/// SQLite-backed outcome repository.
pub struct SqliteOutcomeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOutcomeRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn query_outcomes(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Outcome>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut outcomes = Vec::new();
        while let Some(row) = rows.next()? {
            outcomes.push(parse_outcome_row(row)?);
        }
        drop(rows);

        for outcome in &mut outcomes {
            load_tags(self.conn, outcome)?;
        }
        Ok(outcomes)
    }
}

impl OutcomeRepository for SqliteOutcomeRepository<'_> {
    fn find(&self, id: OutcomeId) -> RepoResult<Option<Outcome>> {
        let sql = format!("SELECT {OUTCOME_COLUMNS_SQL} FROM outcomes o WHERE o.id = ?;");
        let outcomes = self.query_outcomes(&sql, vec![Value::Integer(id)])?;
        Ok(outcomes.into_iter().next())
    }

    fn find_by_ids(&self, ids: &[OutcomeId]) -> RepoResult<Vec<Outcome>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {OUTCOME_COLUMNS_SQL}
             FROM outcomes o
             WHERE o.id IN ({}){OUTCOME_ORDER_SQL};",
            placeholders(ids.len())
        );
        self.query_outcomes(&sql, ids.iter().copied().map(Value::Integer).collect())
    }

    fn find_by(&self, query: &OutcomeQuery) -> RepoResult<Vec<Outcome>> {
        let mut sql = format!("SELECT {OUTCOME_COLUMNS_SQL} FROM outcomes o WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND o.deleted = 0");
        }
        if query.assessable_only {
            sql.push_str(" AND o.assessable = 1");
        }
        if let Some(outcome_set_id) = query.outcome_set_id {
            sql.push_str(" AND o.outcome_set_id = ?");
            bind_values.push(Value::Integer(outcome_set_id));
        }
        if let Some(idnumber) = query.idnumber.as_ref() {
            sql.push_str(" AND o.idnumber = ?");
            bind_values.push(Value::Text(idnumber.clone()));
        }
        sql.push_str(OUTCOME_ORDER_SQL);

        self.query_outcomes(&sql, bind_values)
    }

    fn find_by_outcome_set(&self, outcome_set_id: OutcomeSetId) -> RepoResult<Vec<Outcome>> {
        self.find_by(&OutcomeQuery {
            outcome_set_id: Some(outcome_set_id),
            ..OutcomeQuery::default()
        })
    }

    fn find_by_area(&self, area: &Area) -> RepoResult<Vec<Outcome>> {
        let Some(area_id) = area.id else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {OUTCOME_COLUMNS_SQL}
             FROM outcomes o
             INNER JOIN outcome_area_outcomes ao ON ao.outcome_id = o.id
             WHERE ao.area_id = ?{OUTCOME_ORDER_SQL};"
        );
        self.query_outcomes(&sql, vec![Value::Integer(area_id)])
    }

    fn find_by_area_and_filter(&self, area: &Area, filter: &Filter) -> RepoResult<Vec<Outcome>> {
        let Some(area_id) = area.id else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {OUTCOME_COLUMNS_SQL}
             FROM outcomes o
             INNER JOIN outcome_area_outcomes ao ON ao.outcome_id = o.id
             WHERE ao.area_id = ?
               AND o.outcome_set_id = ?
               AND o.deleted = 0
               AND o.assessable = 1{OUTCOME_ORDER_SQL};"
        );
        let candidates = self.query_outcomes(
            &sql,
            vec![
                Value::Integer(area_id),
                Value::Integer(filter.outcome_set_id),
            ],
        )?;
        Ok(candidates
            .into_iter()
            .filter(|outcome| filter.matches(outcome))
            .collect())
    }

    fn find_by_area_item_ids(
        &self,
        component: &str,
        area: &str,
        item_ids: &[i64],
    ) -> RepoResult<BTreeMap<i64, Vec<Outcome>>> {
        let mut result: BTreeMap<i64, Vec<Outcome>> = BTreeMap::new();
        if item_ids.is_empty() {
            return Ok(result);
        }

        let sql = format!(
            "SELECT a.item_id, {OUTCOME_COLUMNS_SQL}
             FROM outcomes o
             INNER JOIN outcome_area_outcomes ao ON ao.outcome_id = o.id
             INNER JOIN outcome_areas a ON a.id = ao.area_id
             WHERE a.component = ?
               AND a.area = ?
               AND a.item_id IN ({})
             ORDER BY a.item_id ASC, o.sort_order ASC, o.id ASC;",
            placeholders(item_ids.len())
        );
        let mut bind_values = vec![
            Value::Text(component.to_string()),
            Value::Text(area.to_string()),
        ];
        bind_values.extend(item_ids.iter().copied().map(Value::Integer));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        while let Some(row) = rows.next()? {
            let item_id: i64 = row.get("item_id")?;
            let mut outcome = parse_outcome_row(row)?;
            load_tags(self.conn, &mut outcome)?;
            result.entry(item_id).or_default().push(outcome);
        }
        Ok(result)
    }

    fn save(&self, outcome: &mut Outcome) -> RepoResult<OutcomeId> {
        if let Some(id) = outcome.id {
            return Err(RepoError::Immutable {
                entity: EntityKind::Outcome,
                id,
            });
        }
        outcome.validate()?;

        let id = in_write_scope(self.conn, TransactionBehavior::Deferred, |conn| {
            conn.execute(
                "INSERT INTO outcomes (
                    outcome_set_id,
                    parent_id,
                    idnumber,
                    docnum,
                    description,
                    assessable,
                    deleted,
                    sort_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    outcome.outcome_set_id,
                    outcome.parent_id,
                    outcome.idnumber.as_str(),
                    outcome.docnum.as_deref(),
                    outcome.description.as_str(),
                    bool_to_int(outcome.assessable),
                    bool_to_int(outcome.deleted),
                    outcome.sort_order,
                ],
            )?;
            let id = conn.last_insert_rowid();

            for level in &outcome.edu_levels {
                conn.execute(
                    "INSERT OR IGNORE INTO outcome_edulevels (outcome_id, edulevel) VALUES (?1, ?2);",
                    params![id, level.trim()],
                )?;
            }
            for subject in &outcome.subjects {
                conn.execute(
                    "INSERT OR IGNORE INTO outcome_subjects (outcome_id, subject) VALUES (?1, ?2);",
                    params![id, subject.trim()],
                )?;
            }
            Ok(id)
        })?;

        outcome.id = Some(id);
        Ok(id)
    }

    fn remove(&self, id: OutcomeId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE outcomes
             SET
                deleted = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: EntityKind::Outcome,
                id,
            });
        }
        Ok(())
    }
}

fn parse_outcome_row(row: &Row<'_>) -> RepoResult<Outcome> {
    let outcome = Outcome {
        id: Some(row.get("id")?),
        outcome_set_id: row.get("outcome_set_id")?,
        parent_id: row.get("parent_id")?,
        idnumber: row.get("idnumber")?,
        docnum: row.get("docnum")?,
        description: row.get("description")?,
        assessable: int_to_bool(row.get("assessable")?, "outcomes.assessable")?,
        deleted: int_to_bool(row.get("deleted")?, "outcomes.deleted")?,
        sort_order: row.get("sort_order")?,
        edu_levels: Vec::new(),
        subjects: Vec::new(),
    };
    outcome
        .validate()
        .map_err(|err| RepoError::InvalidData(format!("outcome row failed validation: {err}")))?;
    Ok(outcome)
}

fn load_tags(conn: &Connection, outcome: &mut Outcome) -> RepoResult<()> {
    let Some(id) = outcome.id else {
        return Ok(());
    };
    outcome.edu_levels = load_tag_column(
        conn,
        "SELECT edulevel FROM outcome_edulevels WHERE outcome_id = ?1 ORDER BY edulevel ASC;",
        id,
    )?;
    outcome.subjects = load_tag_column(
        conn,
        "SELECT subject FROM outcome_subjects WHERE outcome_id = ?1 ORDER BY subject ASC;",
        id,
    )?;
    Ok(())
}

fn load_tag_column(conn: &Connection, sql: &str, outcome_id: OutcomeId) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let values = stmt
        .query_map([outcome_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}
