//! Area repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist `(component, area, item_id)` rows and their outcome links.
//!
//! # Invariants
//! - At most one row exists per `(component, area, item_id)`.
//! - Removing an area removes its outcome links in the same transaction.
//! - Link writes are set-like: re-adding an existing link is a no-op.

use super::{
    ensure_connection_ready, in_write_scope, placeholders, EntityKind, RepoError, RepoResult,
};
use crate::model::area::Area;
use crate::model::outcome::Outcome;
use crate::model::{AreaId, OutcomeId};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};

const AREA_SELECT_SQL: &str = "SELECT
    id,
    component,
    area,
    item_id
FROM outcome_areas";

/// Query options for listing areas. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaQuery {
    pub component: Option<String>,
    pub area: Option<String>,
    /// Empty means any item id.
    pub item_ids: Vec<i64>,
}

/// Repository interface for areas and area/outcome links.
pub trait AreaRepository {
    /// Gets one area by row id.
    fn find(&self, id: AreaId) -> RepoResult<Option<Area>>;
    /// Gets the area for one `(component, area, item_id)` triple.
    fn find_one(&self, component: &str, area: &str, item_id: i64) -> RepoResult<Option<Area>>;
    /// Lists areas matching the query, ordered by id.
    fn find_by(&self, query: &AreaQuery) -> RepoResult<Vec<Area>>;
    /// Inserts (when `id` is `None`) or updates the area and returns its id.
    fn save(&self, area: &mut Area) -> RepoResult<AreaId>;
    /// Deletes the area and all of its outcome links. Idempotent.
    fn remove(&self, area: &Area) -> RepoResult<()>;
    /// Links the outcomes to the area.
    fn save_area_outcomes(&self, area: &Area, outcomes: &[Outcome]) -> RepoResult<()>;
    /// Unlinks the outcomes from the area. Missing links are ignored.
    fn remove_area_outcomes(&self, area: &Area, outcomes: &[Outcome]) -> RepoResult<()>;
    /// Counts outcome links of the area.
    fn count_area_outcomes(&self, area: &Area) -> RepoResult<u64>;
}

/// SQLite-backed area repository.
pub struct SqliteAreaRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAreaRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AreaRepository for SqliteAreaRepository<'_> {
    fn find(&self, id: AreaId) -> RepoResult<Option<Area>> {
        let area = self
            .conn
            .query_row(
                &format!("{AREA_SELECT_SQL} WHERE id = ?1;"),
                [id],
                parse_area_row,
            )
            .optional()?;
        Ok(area)
    }

    fn find_one(&self, component: &str, area: &str, item_id: i64) -> RepoResult<Option<Area>> {
        let area = self
            .conn
            .query_row(
                &format!(
                    "{AREA_SELECT_SQL}
                     WHERE component = ?1
                       AND area = ?2
                       AND item_id = ?3;"
                ),
                params![component, area, item_id],
                parse_area_row,
            )
            .optional()?;
        Ok(area)
    }

    fn find_by(&self, query: &AreaQuery) -> RepoResult<Vec<Area>> {
        let mut sql = format!("{AREA_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(component) = query.component.as_ref() {
            sql.push_str(" AND component = ?");
            bind_values.push(Value::Text(component.clone()));
        }
        if let Some(area) = query.area.as_ref() {
            sql.push_str(" AND area = ?");
            bind_values.push(Value::Text(area.clone()));
        }
        if !query.item_ids.is_empty() {
            sql.push_str(&format!(
                " AND item_id IN ({})",
                placeholders(query.item_ids.len())
            ));
            bind_values.extend(query.item_ids.iter().copied().map(Value::Integer));
        }
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let areas = stmt
            .query_map(params_from_iter(bind_values), parse_area_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(areas)
    }

    fn save(&self, area: &mut Area) -> RepoResult<AreaId> {
        area.validate()?;

        match area.id {
            None => {
                self.conn.execute(
                    "INSERT INTO outcome_areas (component, area, item_id)
                     VALUES (?1, ?2, ?3);",
                    params![area.component.as_str(), area.area.as_str(), area.item_id],
                )?;
                let id = self.conn.last_insert_rowid();
                area.id = Some(id);
                Ok(id)
            }
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE outcome_areas
                     SET component = ?1, area = ?2, item_id = ?3
                     WHERE id = ?4;",
                    params![area.component.as_str(), area.area.as_str(), area.item_id, id],
                )?;
                if changed == 0 {
                    return Err(RepoError::NotFound {
                        entity: EntityKind::Area,
                        id,
                    });
                }
                Ok(id)
            }
        }
    }

    fn remove(&self, area: &Area) -> RepoResult<()> {
        let Some(id) = area.id else {
            return Ok(());
        };

        in_write_scope(self.conn, TransactionBehavior::Deferred, |conn| {
            conn.execute("DELETE FROM outcome_area_outcomes WHERE area_id = ?1;", [id])?;
            conn.execute("DELETE FROM outcome_areas WHERE id = ?1;", [id])?;
            Ok(())
        })
    }

    fn save_area_outcomes(&self, area: &Area, outcomes: &[Outcome]) -> RepoResult<()> {
        let area_id = area.id.ok_or(RepoError::Unsaved(EntityKind::Area))?;
        let outcome_ids = saved_outcome_ids(outcomes)?;
        if outcome_ids.is_empty() {
            return Ok(());
        }

        in_write_scope(self.conn, TransactionBehavior::Deferred, |conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO outcome_area_outcomes (area_id, outcome_id)
                 VALUES (?1, ?2);",
            )?;
            for outcome_id in outcome_ids {
                stmt.execute(params![area_id, outcome_id])?;
            }
            Ok(())
        })
    }

    fn remove_area_outcomes(&self, area: &Area, outcomes: &[Outcome]) -> RepoResult<()> {
        let area_id = area.id.ok_or(RepoError::Unsaved(EntityKind::Area))?;
        let outcome_ids = saved_outcome_ids(outcomes)?;
        if outcome_ids.is_empty() {
            return Ok(());
        }

        let mut bind_values = vec![Value::Integer(area_id)];
        bind_values.extend(outcome_ids.iter().copied().map(Value::Integer));
        self.conn.execute(
            &format!(
                "DELETE FROM outcome_area_outcomes
                 WHERE area_id = ?
                   AND outcome_id IN ({});",
                placeholders(outcome_ids.len())
            ),
            params_from_iter(bind_values),
        )?;
        Ok(())
    }

    fn count_area_outcomes(&self, area: &Area) -> RepoResult<u64> {
        let Some(area_id) = area.id else {
            return Ok(0);
        };
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outcome_area_outcomes WHERE area_id = ?1;",
            [area_id],
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| {
            RepoError::InvalidData(format!("negative link count {count} for area {area_id}"))
        })
    }
}

fn saved_outcome_ids(outcomes: &[Outcome]) -> RepoResult<Vec<OutcomeId>> {
    outcomes
        .iter()
        .map(|outcome| outcome.id.ok_or(RepoError::Unsaved(EntityKind::Outcome)))
        .collect()
}

fn parse_area_row(row: &Row<'_>) -> rusqlite::Result<Area> {
    Ok(Area {
        id: Some(row.get("id")?),
        component: row.get("component")?,
        area: row.get("area")?,
        item_id: row.get("item_id")?,
    })
}
